//! Sampling policies and errors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which members of a cluster survive, relative to the cluster's own
/// probability statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Keep `p > mean`.
    AboveMean,
    /// Keep `p <= mean`.
    BelowMean,
    /// Keep `p > mean - stdev`.
    #[default]
    AboveMeanStd,
    /// Keep everything.
    None,
}

/// How the budget is split between surviving clusters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterStrategy {
    /// `ceil(budget / clusters)` for every cluster.
    Equal,
    /// `round(budget * size / total)`, ties to even.
    #[default]
    DirectProportion,
}

/// Draw weights inside a cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntraBias {
    #[default]
    Uniform,
    /// `1 / (p + 1e-6)`: favours weak members.
    InverseProb,
    /// `(1 - p) + 1e-5`: favours weak members gently.
    MildInverseProb,
    /// `p`: favours confident members.
    ConfidenceProb,
}

macro_rules! string_enum {
    ($ty:ident, $what:literal, { $($name:literal => $variant:ident),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = SampleError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(SampleError::UnknownPolicy {
                        kind: $what,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(FilterMode, "filter mode", {
    "above_mean" => AboveMean,
    "below_mean" => BelowMean,
    "above_mean_std" => AboveMeanStd,
    "none" => None,
});

string_enum!(InterStrategy, "inter-cluster strategy", {
    "equal" => Equal,
    "direct_proportion" => DirectProportion,
});

string_enum!(IntraBias, "intra-cluster bias", {
    "uniform" => Uniform,
    "inverse_prob" => InverseProb,
    "mild_inverse_prob" => MildInverseProb,
    "confidence_prob" => ConfidenceProb,
});

/// Full sampler policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SamplerConfig {
    pub filter: FilterMode,
    pub inter: InterStrategy,
    pub intra: IntraBias,
    /// Every cluster's draw restarts from this seed.
    pub seed: u64,
    /// Shuffle the concatenated result with `seed`.
    pub shuffle: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            filter: FilterMode::AboveMeanStd,
            inter: InterStrategy::DirectProportion,
            intra: IntraBias::Uniform,
            seed: 42,
            shuffle: false,
        }
    }
}

impl SamplerConfig {
    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_inter(mut self, inter: InterStrategy) -> Self {
        self.inter = inter;
        self
    }

    pub fn with_intra(mut self, intra: IntraBias) -> Self {
        self.intra = intra;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SampleError {
    #[error("{labels} labels but {probabilities} probabilities")]
    LengthMismatch { labels: usize, probabilities: usize },

    #[error("sample budget must be at least 1")]
    ZeroBudget,

    #[error("probability at row {row} is {value}; expected a finite value in [0, 1]")]
    InvalidProbability { row: usize, value: f64 },

    #[error("unknown {kind} '{value}'")]
    UnknownPolicy { kind: &'static str, value: String },

    #[error("weighted draw failed: {0}")]
    Weights(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SamplerConfig::default();
        assert_eq!(cfg.filter, FilterMode::AboveMeanStd);
        assert_eq!(cfg.inter, InterStrategy::DirectProportion);
        assert_eq!(cfg.intra, IntraBias::Uniform);
        assert_eq!(cfg.seed, 42);
        assert!(!cfg.shuffle);
    }

    #[test]
    fn policies_parse_from_strings() {
        assert_eq!("above_mean".parse::<FilterMode>().unwrap(), FilterMode::AboveMean);
        assert_eq!("None".parse::<FilterMode>().unwrap(), FilterMode::None);
        assert_eq!("equal".parse::<InterStrategy>().unwrap(), InterStrategy::Equal);
        assert_eq!(
            "mild_inverse_prob".parse::<IntraBias>().unwrap(),
            IntraBias::MildInverseProb
        );
        assert_eq!(
            "median".parse::<FilterMode>(),
            Err(SampleError::UnknownPolicy {
                kind: "filter mode",
                value: "median".into()
            })
        );
        assert_eq!(IntraBias::ConfidenceProb.to_string(), "confidence_prob");
    }

    #[test]
    fn serde_uses_snake_case() {
        let cfg = SamplerConfig::default().with_intra(IntraBias::InverseProb);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"above_mean_std\""));
        assert!(json.contains("\"inverse_prob\""));
        let back: SamplerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
        assert!(serde_json::from_str::<InterStrategy>("\"random\"").is_err());
    }
}
