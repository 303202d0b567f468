//! Search configuration, objective modes and tuner errors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the search optimises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Maximise the clusterer's MST relative validity.
    #[default]
    Stability,
    /// Maximise the full DBCV score.
    Dbcv,
    /// Pick `min_samples` at the sharpest k-distance elbow; fixed
    /// `min_cluster_size`.
    Heuristic,
    /// Elbow search for `min_samples`, `min_cluster_size` set equal to it.
    Mix,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Stability => "stability",
            Mode::Dbcv => "dbcv",
            Mode::Heuristic => "heuristic",
            Mode::Mix => "mix",
        }
    }

    /// True for the modes that search the 2-D clusterer box.
    pub fn searches_clusterer(self) -> bool {
        matches!(self, Mode::Stability | Mode::Dbcv)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stability" => Ok(Mode::Stability),
            "dbcv" => Ok(Mode::Dbcv),
            "heuristic" => Ok(Mode::Heuristic),
            "mix" => Ok(Mode::Mix),
            _ => Err(TunerError::UnknownMode(s.to_string())),
        }
    }
}

/// Inclusive integer interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
}

impl IntRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Number of integers in the interval.
    pub fn len(&self) -> u64 {
        if self.max < self.min {
            0
        } else {
            (self.max - self.min) as u64 + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, v: i64) -> bool {
        (self.min..=self.max).contains(&v)
    }

    fn validate(&self, name: &'static str) -> Result<(), TunerError> {
        if self.min > self.max {
            return Err(TunerError::InvalidConfig(format!(
                "{name}: min {} is greater than max {}",
                self.min, self.max
            )));
        }
        if self.min < 2 {
            return Err(TunerError::InvalidConfig(format!(
                "{name}: lower bound must be >= 2 (got {})",
                self.min
            )));
        }
        Ok(())
    }
}

/// Tuning run parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TuningConfig {
    pub mode: Mode,
    pub min_samples: IntRange,
    pub min_cluster_size: IntRange,
    /// Objective evaluations for the clusterer modes.
    pub n_calls: usize,
    /// Random evaluations before the surrogate takes over.
    pub n_initial_points: usize,
    /// Random candidates scored by expected improvement per step.
    pub n_candidates: usize,
    /// Exploration margin of expected improvement.
    pub xi: f64,
    pub seed: u64,
    /// Tune on at most this many rows, drawn without replacement.
    pub subsample: Option<usize>,
    /// Neighbourhood sizes searched by the elbow modes.
    pub elbow_k: IntRange,
    /// Objective evaluations for the elbow modes.
    pub elbow_calls: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Stability,
            min_samples: IntRange::new(5, 500),
            min_cluster_size: IntRange::new(5, 500),
            n_calls: 30,
            n_initial_points: 10,
            n_candidates: 2_000,
            xi: 0.01,
            seed: 42,
            subsample: None,
            elbow_k: IntRange::new(5, 100),
            elbow_calls: 25,
        }
    }
}

impl TuningConfig {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_min_samples(mut self, min: i64, max: i64) -> Self {
        self.min_samples = IntRange::new(min, max);
        self
    }

    pub fn with_min_cluster_size(mut self, min: i64, max: i64) -> Self {
        self.min_cluster_size = IntRange::new(min, max);
        self
    }

    pub fn with_n_calls(mut self, n_calls: usize) -> Self {
        self.n_calls = n_calls;
        self
    }

    pub fn with_n_initial_points(mut self, n: usize) -> Self {
        self.n_initial_points = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_subsample(mut self, subsample: Option<usize>) -> Self {
        self.subsample = subsample;
        self
    }

    pub fn with_elbow(mut self, k: IntRange, calls: usize) -> Self {
        self.elbow_k = k;
        self.elbow_calls = calls;
        self
    }

    pub fn validate(&self) -> Result<(), TunerError> {
        self.min_samples.validate("min_samples")?;
        self.min_cluster_size.validate("min_cluster_size")?;
        self.elbow_k.validate("elbow_k")?;
        if self.n_calls == 0 || self.elbow_calls == 0 {
            return Err(TunerError::InvalidConfig(
                "evaluation budget must be at least 1".into(),
            ));
        }
        if self.n_initial_points == 0 {
            return Err(TunerError::InvalidConfig(
                "n_initial_points must be at least 1".into(),
            ));
        }
        if self.n_candidates == 0 {
            return Err(TunerError::InvalidConfig(
                "n_candidates must be at least 1".into(),
            ));
        }
        if !self.xi.is_finite() || self.xi < 0.0 {
            return Err(TunerError::InvalidConfig(format!(
                "xi must be finite and >= 0 (got {})",
                self.xi
            )));
        }
        if let Some(s) = self.subsample {
            if s < 2 {
                return Err(TunerError::InvalidConfig(format!(
                    "subsample must be >= 2 rows (got {s})"
                )));
            }
        }
        Ok(())
    }
}

/// Errors that abort a tuning run. Individual bad trials never do; they are
/// recorded as penalised outcomes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TunerError {
    #[error("invalid tuning config: {0}")]
    InvalidConfig(String),

    #[error("unknown tuning mode '{0}' (expected stability, dbcv, heuristic or mix)")]
    UnknownMode(String),

    #[error("insufficient data: got {n} rows, need at least {min}")]
    InsufficientData { n: usize, min: usize },

    #[error("surrogate model failed: {0}")]
    Surrogate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TuningConfig::default();
        assert_eq!(cfg.mode, Mode::Stability);
        assert_eq!(cfg.min_samples, IntRange::new(5, 500));
        assert_eq!(cfg.min_cluster_size, IntRange::new(5, 500));
        assert_eq!((cfg.n_calls, cfg.n_initial_points, cfg.n_candidates), (30, 10, 2_000));
        assert_eq!(cfg.elbow_k, IntRange::new(5, 100));
        assert_eq!(cfg.elbow_calls, 25);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("dbcv".parse::<Mode>().unwrap(), Mode::Dbcv);
        assert_eq!(" Stability ".parse::<Mode>().unwrap(), Mode::Stability);
        assert_eq!("MIX".parse::<Mode>().unwrap(), Mode::Mix);
        assert_eq!(
            "silhouette".parse::<Mode>(),
            Err(TunerError::UnknownMode("silhouette".into()))
        );
        assert_eq!(Mode::Heuristic.to_string(), "heuristic");
    }

    #[test]
    fn mode_serde_rejects_unknown() {
        let m: Mode = serde_json::from_str("\"heuristic\"").unwrap();
        assert_eq!(m, Mode::Heuristic);
        assert!(serde_json::from_str::<Mode>("\"kmeans\"").is_err());
    }

    #[test]
    fn validate_rejects_bad_boxes_and_budgets() {
        let inverted = TuningConfig::default().with_min_samples(50, 10);
        assert!(matches!(inverted.validate(), Err(TunerError::InvalidConfig(m)) if m.contains("min_samples")));

        let too_low = TuningConfig::default().with_min_cluster_size(1, 10);
        assert!(too_low.validate().is_err());

        assert!(TuningConfig::default().with_n_calls(0).validate().is_err());
        assert!(TuningConfig::default().with_n_initial_points(0).validate().is_err());
        assert!(TuningConfig::default().with_subsample(Some(1)).validate().is_err());
        assert!(TuningConfig::default().with_subsample(Some(2)).validate().is_ok());
    }

    #[test]
    fn int_range_len() {
        assert_eq!(IntRange::new(5, 5).len(), 1);
        assert_eq!(IntRange::new(5, 500).len(), 496);
        assert!(IntRange::new(3, 2).is_empty());
        assert!(IntRange::new(2, 4).contains(4));
    }
}
