//! # Strata Manifold
//!
//! Dimension estimation and nonlinear dimensionality reduction for dense
//! embedding matrices.
//!
//! ## Contract
//!
//! - Inputs are `ndarray` matrices with one point per row. They are only read.
//! - Every fitted artifact is a fresh value returned by `fit`; nothing is
//!   shared between runs and nothing changes after fitting.
//! - With exact neighbour search (the default) the same input and seed give a
//!   bit-identical layout regardless of the rayon thread count.
//!
//! ## Components
//!
//! 1.  **Intrinsic dimension** ([`estimate_intrinsic_dimension`]): the TwoNN
//!     maximum-likelihood estimate over nearest-neighbour distance ratios,
//!     rounded and clamped to a configured range.
//!
//! 2.  **Reduction** ([`ReducerConfig::fit`], [`FittedReducer::transform`]):
//!     a k-nearest-neighbour graph is turned into a fuzzy membership graph,
//!     initialised from principal components and laid out by negative-sampling
//!     SGD. New rows are placed against the frozen layout.
//!
//! ## Example Usage
//!
//! ```
//! use manifold::{estimate_intrinsic_dimension, IntrinsicConfig, ReducerConfig};
//! use ndarray::Array2;
//!
//! let data = Array2::from_shape_fn((60, 4), |(i, j)| {
//!     (i as f32 * 0.37 + j as f32).sin() * 3.0 + i as f32 * 0.1
//! });
//! let d = estimate_intrinsic_dimension(data.view(), &IntrinsicConfig::default()).unwrap();
//! assert!((5..=50).contains(&d));
//!
//! let reducer = ReducerConfig::default()
//!     .with_n_neighbors(8)
//!     .with_n_components(2)
//!     .with_n_epochs(50);
//! let (fitted, layout) = reducer.fit_transform(data.view()).unwrap();
//! assert_eq!(layout.dim(), (60, 2));
//! assert_eq!(fitted.transform(data.view()).unwrap().dim(), (60, 2));
//! ```

mod ann;
pub mod config;
mod graph;
mod init;
pub mod intrinsic;
mod knn;
pub mod layout;
pub mod reducer;

pub use crate::config::{IntrinsicConfig, ManifoldError, Metric, NeighborConfig, ReducerConfig};
pub use crate::intrinsic::{estimate_intrinsic_dimension, two_nn_dimension};
pub use crate::layout::find_ab_params;
pub use crate::reducer::FittedReducer;
