//! Workspace umbrella crate for Strata.
//!
//! Strata turns a matrix of text embeddings into a small stratified sample:
//! it estimates the intrinsic dimension, reduces the data in two manifold
//! stages, tunes a hierarchical density clusterer on the result and draws a
//! budget of rows from the clusters it finds. Fitted pipelines also place new
//! rows into the existing clusters without refitting anything.
//!
//! ```no_run
//! use strata::{demo, fit_pipeline, sample, PipelineConfig, SamplerConfig};
//!
//! let (matrix, _) = demo::gaussian_blobs(3, 50, 50, 0.5, 25.0, 7);
//! let pipeline = fit_pipeline(matrix.view(), &PipelineConfig::default().with_seed(7))?;
//! let picked = sample(pipeline.assignment(), 30, &SamplerConfig::default())?;
//! println!("selected rows: {:?}", picked.indices());
//! # Ok::<(), strata::PipelineError>(())
//! ```

pub mod config;
pub mod demo;

pub use density::{
    ClusterAssignment, DensityError, FittedClusterer, HdbscanParams, NOISE, Parallelism,
    ValidityError, dbcv_score,
};
pub use manifold::{
    FittedReducer, IntrinsicConfig, ManifoldError, Metric, NeighborConfig, ReducerConfig,
};
pub use sampler::{
    EmptyReason, FilterMode, InterStrategy, IntraBias, SampleBudgetPlan, SampleError,
    SampleOutcome, SamplerConfig, Selection,
};
pub use tuner::{HyperparameterCandidate, IntRange, Mode, TunerError, TuningConfig, TuningReport};

pub use crate::config::{ConfigLoadError, StrataConfig};

use std::error::Error;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Errors that can occur while fitting or applying the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    Manifold(ManifoldError),
    Density(DensityError),
    Tuner(TunerError),
    Sample(SampleError),
    RecordOutOfRange { index: usize, len: usize },
}

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Too few rows for the requested computation.
    InsufficientData,
    /// Column count or parallel-slice length does not match.
    InputShape,
    /// Non-finite coordinates or probabilities outside `[0, 1]`.
    InvalidInput,
    /// Rejected before any computation started.
    InvalidConfiguration,
    /// A numerical routine broke down.
    Numerical,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Manifold(err) => match err {
                ManifoldError::InsufficientData { .. } | ManifoldError::NoDistinctNeighbors => {
                    ErrorKind::InsufficientData
                }
                ManifoldError::InputShape { .. } => ErrorKind::InputShape,
                ManifoldError::NonFinite { .. } => ErrorKind::InvalidInput,
                ManifoldError::InvalidNeighbors { .. }
                | ManifoldError::InvalidComponents
                | ManifoldError::InvalidMinDist { .. }
                | ManifoldError::InvalidLearningRate { .. }
                | ManifoldError::InvalidEpochs
                | ManifoldError::InvalidDimensionRange { .. } => ErrorKind::InvalidConfiguration,
            },
            PipelineError::Density(err) => match err {
                DensityError::InsufficientData { .. } => ErrorKind::InsufficientData,
                DensityError::InputShape { .. } => ErrorKind::InputShape,
                DensityError::NonFinite { .. } => ErrorKind::InvalidInput,
                DensityError::InvalidMinSamples { .. }
                | DensityError::InvalidMinClusterSize { .. } => ErrorKind::InvalidConfiguration,
            },
            PipelineError::Tuner(err) => match err {
                TunerError::InvalidConfig(_) | TunerError::UnknownMode(_) => {
                    ErrorKind::InvalidConfiguration
                }
                TunerError::InsufficientData { .. } => ErrorKind::InsufficientData,
                TunerError::Surrogate(_) => ErrorKind::Numerical,
            },
            PipelineError::Sample(err) => match err {
                SampleError::LengthMismatch { .. } => ErrorKind::InputShape,
                SampleError::ZeroBudget | SampleError::UnknownPolicy { .. } => {
                    ErrorKind::InvalidConfiguration
                }
                SampleError::InvalidProbability { .. } => ErrorKind::InvalidInput,
                SampleError::Weights(_) => ErrorKind::Numerical,
            },
            PipelineError::RecordOutOfRange { .. } => ErrorKind::InputShape,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Manifold(err) => write!(f, "manifold stage failed: {err}"),
            PipelineError::Density(err) => write!(f, "density clustering failed: {err}"),
            PipelineError::Tuner(err) => write!(f, "hyperparameter tuning failed: {err}"),
            PipelineError::Sample(err) => write!(f, "sampling failed: {err}"),
            PipelineError::RecordOutOfRange { index, len } => {
                write!(f, "selected index {index} is outside a dataset of {len} records")
            }
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::Manifold(err) => Some(err),
            PipelineError::Density(err) => Some(err),
            PipelineError::Tuner(err) => Some(err),
            PipelineError::Sample(err) => Some(err),
            PipelineError::RecordOutOfRange { .. } => None,
        }
    }
}

impl From<ManifoldError> for PipelineError {
    fn from(value: ManifoldError) -> Self {
        PipelineError::Manifold(value)
    }
}

impl From<DensityError> for PipelineError {
    fn from(value: DensityError) -> Self {
        PipelineError::Density(value)
    }
}

impl From<TunerError> for PipelineError {
    fn from(value: TunerError) -> Self {
        PipelineError::Tuner(value)
    }
}

impl From<SampleError> for PipelineError {
    fn from(value: SampleError) -> Self {
        PipelineError::Sample(value)
    }
}

/// Which reducer a reduction event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReductionStage {
    One,
    Two,
}

/// Metrics observer for pipeline stages.
pub trait PipelineMetrics: Send + Sync {
    fn record_intrinsic(&self, latency: Duration, result: Result<(), ManifoldError>);
    fn record_reduction(
        &self,
        stage: ReductionStage,
        latency: Duration,
        result: Result<(), ManifoldError>,
    );
    fn record_tuning(&self, latency: Duration, result: Result<(), TunerError>);
    fn record_clustering(&self, latency: Duration, result: Result<(), DensityError>);
    fn record_prediction(&self, latency: Duration, result: Result<(), PipelineError>);
    fn record_sampling(&self, latency: Duration, result: Result<(), SampleError>);
}

/// Install or clear the global pipeline metrics recorder.
///
/// [`fit_pipeline`], [`FittedPipeline::predict`] and [`sample`] report to it;
/// [`fit_pipeline_with_metrics`] takes an explicit recorder instead.
pub fn set_pipeline_metrics(recorder: Option<Arc<dyn PipelineMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn PipelineMetrics>>> {
    static METRICS: OnceLock<RwLock<Option<Arc<dyn PipelineMetrics>>>> = OnceLock::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

fn metrics_recorder() -> Option<Arc<dyn PipelineMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

struct MetricsSpan<'a> {
    recorder: &'a dyn PipelineMetrics,
    start: Instant,
}

impl<'a> MetricsSpan<'a> {
    fn start(recorder: Option<&'a Arc<dyn PipelineMetrics>>) -> Option<Self> {
        recorder.map(|recorder| Self {
            recorder: recorder.as_ref(),
            start: Instant::now(),
        })
    }
}

/// Run `op`, reporting its latency and outcome through `report` when a
/// recorder is installed.
fn observed<T, E: Clone>(
    recorder: Option<&Arc<dyn PipelineMetrics>>,
    op: impl FnOnce() -> Result<T, E>,
    report: impl FnOnce(&dyn PipelineMetrics, Duration, Result<(), E>),
) -> Result<T, E> {
    let span = MetricsSpan::start(recorder);
    let result = op();
    if let Some(span) = span {
        let outcome = match &result {
            Ok(_) => Ok(()),
            Err(err) => Err(err.clone()),
        };
        report(span.recorder, span.start.elapsed(), outcome);
    }
    result
}

/// Settings for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub intrinsic: IntrinsicConfig,
    /// Template for the first reducer. Its `n_components` is replaced by the
    /// intrinsic dimension estimate at fit time.
    pub stage_one: ReducerConfig,
    pub stage_two: ReducerConfig,
    pub tuning: TuningConfig,
    /// Overrides the seeds of both reducers and the tuner when set.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let intrinsic = IntrinsicConfig::default();
        Self {
            intrinsic,
            stage_one: ReducerConfig::stage_one(intrinsic.min_dimension),
            stage_two: ReducerConfig::stage_two(),
            tuning: TuningConfig::default(),
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_intrinsic(mut self, intrinsic: IntrinsicConfig) -> Self {
        self.intrinsic = intrinsic;
        self
    }

    pub fn with_stage_one(mut self, stage_one: ReducerConfig) -> Self {
        self.stage_one = stage_one;
        self
    }

    pub fn with_stage_two(mut self, stage_two: ReducerConfig) -> Self {
        self.stage_two = stage_two;
        self
    }

    pub fn with_tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }

    /// Check every stage's settings without touching any data.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.intrinsic.validate()?;
        self.stage_one
            .clone()
            .with_n_components(self.intrinsic.min_dimension)
            .validate()?;
        self.stage_two.validate()?;
        self.tuning.validate()?;
        Ok(())
    }

    fn resolved(&self, intrinsic_dimension: usize) -> (ReducerConfig, ReducerConfig, TuningConfig) {
        let mut one = self.stage_one.clone().with_n_components(intrinsic_dimension);
        let mut two = self.stage_two.clone();
        let mut tuning = self.tuning.clone();
        if let Some(seed) = self.seed {
            one = one.with_seed(seed);
            two = two.with_seed(seed);
            tuning = tuning.with_seed(seed);
        }
        (one, two, tuning)
    }
}

/// Everything [`fit_pipeline`] learned. Immutable once built.
#[derive(Debug, Clone)]
pub struct FittedPipeline {
    pub stage_one: FittedReducer,
    pub stage_two: FittedReducer,
    /// Clusterer refit on the full reduced matrix with the tuned parameters.
    pub clusterer: FittedClusterer,
    pub best: HyperparameterCandidate,
    pub tuning: TuningReport,
    pub intrinsic_dimension: usize,
    reduced: Array2<f32>,
}

impl FittedPipeline {
    /// Cluster assignment of the rows the pipeline was fitted on.
    pub fn assignment(&self) -> &ClusterAssignment {
        self.clusterer.assignment()
    }

    /// Stage-two coordinates of the training rows.
    pub fn reduced(&self) -> &Array2<f32> {
        &self.reduced
    }

    pub fn n_clusters(&self) -> usize {
        self.clusterer.n_clusters()
    }

    /// Assign new rows to the fitted clusters.
    ///
    /// Runs stage-one transform, stage-two transform and approximate cluster
    /// prediction. Nothing is refit, so repeated calls agree exactly.
    pub fn predict(&self, matrix: ArrayView2<'_, f32>) -> Result<ClusterAssignment, PipelineError> {
        let recorder = metrics_recorder();
        observed(
            recorder.as_ref(),
            || -> Result<ClusterAssignment, PipelineError> {
                let one = self.stage_one.transform(matrix)?;
                let two = self.stage_two.transform(one.view())?;
                Ok(self.clusterer.predict(two.view())?)
            },
            |m, latency, result| m.record_prediction(latency, result),
        )
    }
}

/// Intrinsic dimension of `matrix`, clamped to `cfg.intrinsic`.
pub fn estimate_intrinsic_dimension(
    matrix: ArrayView2<'_, f32>,
    cfg: &PipelineConfig,
) -> Result<usize, PipelineError> {
    cfg.intrinsic.validate()?;
    let recorder = metrics_recorder();
    let dimension = observed(
        recorder.as_ref(),
        || manifold::estimate_intrinsic_dimension(matrix, &cfg.intrinsic),
        |m, latency, result| m.record_intrinsic(latency, result),
    )?;
    Ok(dimension)
}

/// Fit the whole pipeline, reporting to the global metrics recorder.
pub fn fit_pipeline(
    matrix: ArrayView2<'_, f32>,
    cfg: &PipelineConfig,
) -> Result<FittedPipeline, PipelineError> {
    fit_pipeline_with_metrics(matrix, cfg, metrics_recorder())
}

/// Fit the whole pipeline.
///
/// The configuration is validated before any computation. Stages then run in
/// order: intrinsic dimension, stage-one reducer, stage-two reducer,
/// hyperparameter search on the reduced matrix, and a final clusterer fit on
/// the full reduced matrix with core distances computed on every core.
///
/// A final clustering that is all noise is returned as is, with a warning.
pub fn fit_pipeline_with_metrics(
    matrix: ArrayView2<'_, f32>,
    cfg: &PipelineConfig,
    recorder: Option<Arc<dyn PipelineMetrics>>,
) -> Result<FittedPipeline, PipelineError> {
    cfg.validate()?;
    let recorder = recorder.as_ref();
    info!(
        rows = matrix.nrows(),
        cols = matrix.ncols(),
        mode = %cfg.tuning.mode,
        "pipeline_start"
    );

    let intrinsic_dimension = observed(
        recorder,
        || manifold::estimate_intrinsic_dimension(matrix, &cfg.intrinsic),
        |m, latency, result| m.record_intrinsic(latency, result),
    )?;
    info!(intrinsic_dimension, "intrinsic_dimension");

    let (one_cfg, two_cfg, tuning_cfg) = cfg.resolved(intrinsic_dimension);
    let (stage_one, reduced_one) = observed(
        recorder,
        || one_cfg.fit_transform(matrix),
        |m, latency, result| m.record_reduction(ReductionStage::One, latency, result),
    )?;
    let (stage_two, reduced) = observed(
        recorder,
        || two_cfg.fit_transform(reduced_one.view()),
        |m, latency, result| m.record_reduction(ReductionStage::Two, latency, result),
    )?;

    let tuning = observed(
        recorder,
        || tuner::tune(reduced.view(), &tuning_cfg),
        |m, latency, result| m.record_tuning(latency, result),
    )?;
    let best = tuning.best;

    let params = HdbscanParams::new(best.min_samples, best.min_cluster_size)
        .with_parallelism(Parallelism::All);
    let clusterer = observed(
        recorder,
        || params.fit(reduced.view()),
        |m, latency, result| m.record_clustering(latency, result),
    )?;

    if clusterer.is_degenerate() {
        warn!(
            min_samples = best.min_samples,
            min_cluster_size = best.min_cluster_size,
            "final clustering labelled every row as noise"
        );
    }
    info!(
        clusters = clusterer.n_clusters(),
        noise = clusterer.assignment().noise_count(),
        min_samples = best.min_samples,
        min_cluster_size = best.min_cluster_size,
        "pipeline_done"
    );

    Ok(FittedPipeline {
        stage_one,
        stage_two,
        clusterer,
        best,
        tuning,
        intrinsic_dimension,
        reduced,
    })
}

/// Draw about `budget` rows from a cluster assignment.
///
/// Returned indices refer to rows of the matrix the assignment describes.
pub fn sample(
    assignment: &ClusterAssignment,
    budget: usize,
    cfg: &SamplerConfig,
) -> Result<SampleOutcome, PipelineError> {
    let recorder = metrics_recorder();
    let outcome = observed(
        recorder.as_ref(),
        || sampler::sample(&assignment.labels, &assignment.probabilities, budget, cfg),
        |m, latency, result| m.record_sampling(latency, result),
    )?;
    Ok(outcome)
}

/// Look up sampled indices in a caller-owned dataset, in index order.
pub fn select_records<'a, T>(
    records: &'a [T],
    indices: &[usize],
) -> Result<Vec<&'a T>, PipelineError> {
    indices
        .iter()
        .map(|&index| {
            records.get(index).ok_or(PipelineError::RecordOutOfRange {
                index,
                len: records.len(),
            })
        })
        .collect()
}
