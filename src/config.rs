//! YAML Configuration File Support for Strata
//!
//! This module loads a whole pipeline run (dimension clamp, both reducers,
//! the hyperparameter search and the sampling policy) from one YAML file.
//! Every section and field is optional; missing values take the same
//! defaults as the builder API.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! # Strata Pipeline Configuration
//! version: "1.0"
//! seed: 42
//!
//! intrinsic:
//!   min_dimension: 5
//!   max_dimension: 50
//!
//! reduction:
//!   stage_one:
//!     n_neighbors: 100
//!     metric: "cosine"
//!     min_dist: 0.0
//!   stage_two:
//!     n_neighbors: 20
//!     n_components: 10
//!     metric: "euclidean"
//!     min_dist: 0.0
//!
//! tuning:
//!   mode: "stability"
//!   min_samples: { min: 5, max: 500 }
//!   min_cluster_size: { min: 5, max: 500 }
//!   n_calls: 30
//!   subsample: 20000
//!
//! sampling:
//!   budget: 200
//!   filter: "above_mean_std"
//!   inter: "direct_proportion"
//!   intra: "uniform"
//! ```

use std::fs;
use std::path::Path;

use manifold::{IntrinsicConfig, Metric, NeighborConfig, ReducerConfig};
use sampler::{FilterMode, InterStrategy, IntraBias, SamplerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tuner::{IntRange, Mode, TuningConfig};

use crate::PipelineConfig;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration for one Strata run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StrataConfig {
    /// Configuration format version
    #[serde(default = "default_config_version")]
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Seed threaded through reduction, tuning and sampling
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub intrinsic: IntrinsicYamlConfig,

    #[serde(default)]
    pub reduction: ReductionYamlConfig,

    #[serde(default)]
    pub tuning: TuningYamlConfig,

    #[serde(default)]
    pub sampling: SamplingYamlConfig,
}

impl StrataConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: StrataConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section, then the cross-field rules of the typed configs.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.intrinsic.validate()?;
        self.reduction.stage_one.validate("reduction.stage_one")?;
        self.reduction.stage_two.validate("reduction.stage_two")?;
        self.tuning.validate()?;
        self.sampling.validate()?;

        // The typed configs carry the cross-field rules.
        self.pipeline_config()?
            .validate()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;
        Ok(())
    }

    /// Pipeline settings described by this file.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigLoadError> {
        let intrinsic = IntrinsicConfig::default()
            .with_range(self.intrinsic.min_dimension, self.intrinsic.max_dimension);
        let stage_one = self
            .reduction
            .stage_one
            .apply(ReducerConfig::stage_one(self.intrinsic.min_dimension))?;
        let stage_two = self.reduction.stage_two.apply(ReducerConfig::stage_two())?;
        Ok(PipelineConfig {
            intrinsic,
            stage_one,
            stage_two,
            tuning: self.tuning.to_tuning_config()?,
            seed: Some(self.seed),
        })
    }

    /// Sampling policy described by this file.
    pub fn sampler_config(&self) -> Result<SamplerConfig, ConfigLoadError> {
        Ok(SamplerConfig {
            filter: parse_field::<FilterMode>("sampling.filter", &self.sampling.filter)?,
            inter: parse_field::<InterStrategy>("sampling.inter", &self.sampling.inter)?,
            intra: parse_field::<IntraBias>("sampling.intra", &self.sampling.intra)?,
            seed: self.seed,
            shuffle: self.sampling.shuffle,
        })
    }
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            name: None,
            seed: default_seed(),
            intrinsic: IntrinsicYamlConfig::default(),
            reduction: ReductionYamlConfig::default(),
            tuning: TuningYamlConfig::default(),
            sampling: SamplingYamlConfig::default(),
        }
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigLoadError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigLoadError::Validation(format!("{field}: {e}")))
}

/// Intrinsic dimension clamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrinsicYamlConfig {
    #[serde(default = "default_min_dimension")]
    pub min_dimension: usize,

    #[serde(default = "default_max_dimension")]
    pub max_dimension: usize,
}

impl IntrinsicYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.min_dimension == 0 {
            return Err(ConfigLoadError::Validation(
                "intrinsic.min_dimension must be >= 1".to_string(),
            ));
        }
        if self.min_dimension > self.max_dimension {
            return Err(ConfigLoadError::Validation(
                "intrinsic.min_dimension must be <= intrinsic.max_dimension".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for IntrinsicYamlConfig {
    fn default() -> Self {
        Self {
            min_dimension: default_min_dimension(),
            max_dimension: default_max_dimension(),
        }
    }
}

/// Both manifold reduction stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionYamlConfig {
    #[serde(default = "default_stage_one")]
    pub stage_one: StageYamlConfig,

    #[serde(default = "default_stage_two")]
    pub stage_two: StageYamlConfig,
}

impl Default for ReductionYamlConfig {
    fn default() -> Self {
        Self {
            stage_one: default_stage_one(),
            stage_two: default_stage_two(),
        }
    }
}

/// One reducer. Unset fields keep the stage preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageYamlConfig {
    #[serde(default)]
    pub n_neighbors: Option<usize>,

    /// Ignored for stage one, whose output size is the intrinsic dimension.
    #[serde(default)]
    pub n_components: Option<usize>,

    #[serde(default)]
    pub metric: Option<String>,

    #[serde(default)]
    pub min_dist: Option<f32>,

    #[serde(default)]
    pub n_epochs: Option<usize>,

    /// Use HNSW neighbour search for large inputs
    #[serde(default)]
    pub use_ann: bool,
}

impl StageYamlConfig {
    fn validate(&self, section: &str) -> Result<(), ConfigLoadError> {
        if let Some(k) = self.n_neighbors
            && k < 2
        {
            return Err(ConfigLoadError::Validation(format!(
                "{section}.n_neighbors must be >= 2"
            )));
        }
        if self.n_components == Some(0) {
            return Err(ConfigLoadError::Validation(format!(
                "{section}.n_components must be >= 1"
            )));
        }
        if let Some(metric) = &self.metric {
            parse_metric(section, metric)?;
        }
        Ok(())
    }

    fn apply(&self, preset: ReducerConfig) -> Result<ReducerConfig, ConfigLoadError> {
        let mut cfg = preset;
        if let Some(k) = self.n_neighbors {
            cfg.n_neighbors = k;
        }
        if let Some(c) = self.n_components {
            cfg.n_components = c;
        }
        if let Some(metric) = &self.metric {
            cfg.metric = parse_metric("reduction", metric)?;
        }
        if let Some(min_dist) = self.min_dist {
            cfg.min_dist = min_dist;
        }
        cfg.n_epochs = self.n_epochs.or(cfg.n_epochs);
        cfg.neighbors = NeighborConfig::default().with_ann(self.use_ann);
        Ok(cfg)
    }
}

fn parse_metric(section: &str, metric: &str) -> Result<Metric, ConfigLoadError> {
    match metric.to_ascii_lowercase().as_str() {
        "cosine" => Ok(Metric::Cosine),
        "euclidean" => Ok(Metric::Euclidean),
        other => Err(ConfigLoadError::Validation(format!(
            "{section}.metric must be 'cosine' or 'euclidean' (got '{other}')"
        ))),
    }
}

/// Hyperparameter search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningYamlConfig {
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default = "default_search_range")]
    pub min_samples: IntRange,

    #[serde(default = "default_search_range")]
    pub min_cluster_size: IntRange,

    #[serde(default = "default_n_calls")]
    pub n_calls: usize,

    #[serde(default = "default_n_initial_points")]
    pub n_initial_points: usize,

    /// Tune on a seeded subset of this many rows
    #[serde(default)]
    pub subsample: Option<usize>,

    #[serde(default = "default_elbow_k")]
    pub elbow_k: IntRange,

    #[serde(default = "default_elbow_calls")]
    pub elbow_calls: usize,
}

impl TuningYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        parse_field::<Mode>("tuning.mode", &self.mode)?;
        if self.n_calls == 0 {
            return Err(ConfigLoadError::Validation(
                "tuning.n_calls must be >= 1".to_string(),
            ));
        }
        if self.subsample == Some(0) {
            return Err(ConfigLoadError::Validation(
                "tuning.subsample must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    fn to_tuning_config(&self) -> Result<TuningConfig, ConfigLoadError> {
        let mode = parse_field::<Mode>("tuning.mode", &self.mode)?;
        Ok(TuningConfig::default()
            .with_mode(mode)
            .with_min_samples(self.min_samples.min, self.min_samples.max)
            .with_min_cluster_size(self.min_cluster_size.min, self.min_cluster_size.max)
            .with_n_calls(self.n_calls)
            .with_n_initial_points(self.n_initial_points)
            .with_subsample(self.subsample)
            .with_elbow(self.elbow_k, self.elbow_calls))
    }
}

impl Default for TuningYamlConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            min_samples: default_search_range(),
            min_cluster_size: default_search_range(),
            n_calls: default_n_calls(),
            n_initial_points: default_n_initial_points(),
            subsample: None,
            elbow_k: default_elbow_k(),
            elbow_calls: default_elbow_calls(),
        }
    }
}

/// Sampling budget and policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingYamlConfig {
    #[serde(default = "default_budget")]
    pub budget: usize,

    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default = "default_inter")]
    pub inter: String,

    #[serde(default = "default_intra")]
    pub intra: String,

    #[serde(default)]
    pub shuffle: bool,
}

impl SamplingYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.budget == 0 {
            return Err(ConfigLoadError::Validation(
                "sampling.budget must be >= 1".to_string(),
            ));
        }
        parse_field::<FilterMode>("sampling.filter", &self.filter)?;
        parse_field::<InterStrategy>("sampling.inter", &self.inter)?;
        parse_field::<IntraBias>("sampling.intra", &self.intra)?;
        Ok(())
    }
}

impl Default for SamplingYamlConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            filter: default_filter(),
            inter: default_inter(),
            intra: default_intra(),
            shuffle: false,
        }
    }
}

fn default_config_version() -> String {
    "1.0".to_string()
}
fn default_seed() -> u64 {
    42
}
fn default_min_dimension() -> usize {
    IntrinsicConfig::default().min_dimension
}
fn default_max_dimension() -> usize {
    IntrinsicConfig::default().max_dimension
}
fn default_stage_one() -> StageYamlConfig {
    StageYamlConfig::default()
}
fn default_stage_two() -> StageYamlConfig {
    StageYamlConfig::default()
}
fn default_mode() -> String {
    Mode::default().as_str().to_string()
}
fn default_search_range() -> IntRange {
    IntRange::new(5, 500)
}
fn default_n_calls() -> usize {
    TuningConfig::default().n_calls
}
fn default_n_initial_points() -> usize {
    TuningConfig::default().n_initial_points
}
fn default_elbow_k() -> IntRange {
    TuningConfig::default().elbow_k
}
fn default_elbow_calls() -> usize {
    TuningConfig::default().elbow_calls
}
fn default_budget() -> usize {
    100
}
fn default_filter() -> String {
    FilterMode::default().as_str().to_string()
}
fn default_inter() -> String {
    InterStrategy::default().as_str().to_string()
}
fn default_intra() -> String {
    IntraBias::default().as_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_yaml() {
        let yaml = r#"
version: "1.0"
name: "test config"
seed: 7
tuning:
  mode: "dbcv"
  min_samples: { min: 2, max: 20 }
sampling:
  budget: 50
  intra: "inverse_prob"
"#;

        let config = StrataConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("test config".to_string()));
        assert_eq!(config.seed, 7);

        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.tuning.mode, Mode::Dbcv);
        assert_eq!(pipeline.tuning.min_samples, IntRange::new(2, 20));
        assert_eq!(pipeline.seed, Some(7));

        let sampler = config.sampler_config().unwrap();
        assert_eq!(sampler.intra, IntraBias::InverseProb);
        assert_eq!(sampler.filter, FilterMode::AboveMeanStd);
        assert_eq!(sampler.seed, 7);
        assert_eq!(config.sampling.budget, 50);
    }

    #[test]
    fn test_load_from_file() {
        let yaml = r#"
version: "1.0"
intrinsic:
  min_dimension: 3
  max_dimension: 12
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = StrataConfig::from_file(temp_file.path()).unwrap();
        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.intrinsic.min_dimension, 3);
        assert_eq!(pipeline.intrinsic.max_dimension, 12);
    }

    #[test]
    fn test_missing_file() {
        let result = StrataConfig::from_file("/definitely/not/here.yaml");
        assert!(matches!(result, Err(ConfigLoadError::FileRead(_))));
    }

    #[test]
    fn test_default_config_matches_builders() {
        let config = StrataConfig::from_yaml("{}").unwrap();
        assert_eq!(config.version, "1.0");
        assert!(config.name.is_none());

        let pipeline = config.pipeline_config().unwrap();
        let defaults = PipelineConfig::default().with_seed(42);
        assert_eq!(pipeline, defaults);
        assert_eq!(config.sampler_config().unwrap(), SamplerConfig::default());
    }

    #[test]
    fn test_stage_overrides() {
        let yaml = r#"
reduction:
  stage_one:
    n_neighbors: 30
    n_components: 99
  stage_two:
    n_neighbors: 8
    n_components: 4
    metric: "cosine"
    n_epochs: 50
    use_ann: true
"#;
        let pipeline = StrataConfig::from_yaml(yaml).unwrap().pipeline_config().unwrap();
        assert_eq!(pipeline.stage_one.n_neighbors, 30);
        assert_eq!(pipeline.stage_one.metric, Metric::Cosine);
        assert_eq!(pipeline.stage_two.n_neighbors, 8);
        assert_eq!(pipeline.stage_two.n_components, 4);
        assert_eq!(pipeline.stage_two.metric, Metric::Cosine);
        assert_eq!(pipeline.stage_two.n_epochs, Some(50));
        assert!(pipeline.stage_two.neighbors.use_ann);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let yaml = r#"
tuning:
  mode: "kmeans"
"#;

        let result = StrataConfig::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("tuning.mode"));
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        let yaml = r#"
tuning:
  min_cluster_size: { min: 40, max: 10 }
"#;

        let err = StrataConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Validation(_)));
    }

    #[test]
    fn test_sampling_validation() {
        let yaml = r#"
sampling:
  filter: "median"
"#;
        let err = StrataConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("sampling.filter"));

        let err = StrataConfig::from_yaml("sampling:\n  budget: 0\n").unwrap_err();
        assert!(err.to_string().contains("budget must be >= 1"));
    }

    #[test]
    fn test_unsupported_version() {
        let err = StrataConfig::from_yaml("version: \"2.0\"\n").unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnsupportedVersion(v) if v == "2.0"));
    }
}
