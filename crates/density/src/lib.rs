//! # Strata Density
//!
//! Hierarchical density clustering (HDBSCAN with excess-of-mass selection)
//! for reduced embedding matrices, plus the two validity scores used to tune
//! it.
//!
//! ## Pipeline
//!
//! 1.  Core distance of every row (its `min_samples`-th neighbour, the row
//!     itself counted), optionally computed on the rayon pool.
//! 2.  Prim's minimum spanning tree over mutual reachability
//!     `max(d(a, b), core(a), core(b))`.
//! 3.  Single-linkage dendrogram, condensed by `min_cluster_size`.
//! 4.  Stability-based cluster selection, labels, membership strengths.
//!
//! The MST is always kept so [`FittedClusterer::quality`] can score the
//! labelling without touching the data again. [`dbcv_score`] is the full,
//! slower Density-Based Clustering Validation index.
//!
//! ## Example Usage
//!
//! ```
//! use density::{dbcv_score, HdbscanParams};
//! use ndarray::Array2;
//!
//! let data = Array2::from_shape_fn((40, 2), |(i, j)| {
//!     let centre = if i < 20 { 0.0 } else { 20.0 };
//!     centre + ((i * 7 + j * 3) % 5) as f32 * 0.2 + j as f32 * 0.05 * i as f32
//! });
//! let fitted = HdbscanParams::new(3, 5).fit(data.view()).unwrap();
//! assert_eq!(fitted.assignment().len(), 40);
//!
//! if fitted.n_clusters() >= 2 {
//!     let score = dbcv_score(data.view(), &fitted.assignment().labels).unwrap();
//!     assert!((-1.0..=1.0).contains(&score));
//! }
//! ```

pub mod config;
mod model;
mod points;
mod predict;
mod select;
pub mod tree;
mod validity;

pub use crate::config::{DensityError, HdbscanParams, Parallelism, ValidityError};
pub use crate::model::{ClusterAssignment, FittedClusterer, MIN_FIT_ROWS};
pub use crate::select::NOISE;
pub use crate::tree::{CondensedRow, CondensedTree, MstEdge};
pub use crate::validity::dbcv_score;
