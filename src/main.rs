//! Strata CLI - fit the pipeline on a batch of embeddings and print a sample
//!
//! ```text
//! strata [--config strata.yaml] [--input records.jsonl] [--budget N] [--seed N]
//!        [--mode MODE] [--filter F] [--inter S] [--intra B] [--json-logs]
//! ```
//!
//! Input is JSON lines of `{"id": ..., "embedding": [...]}`. Without
//! `--input` a synthetic three-blob matrix is used. Logging honours
//! `RUST_LOG` (default `info`) and goes to stderr; the result goes to stdout.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use strata::{
    FilterMode, HyperparameterCandidate, InterStrategy, IntraBias, Mode, SampleOutcome,
    StrataConfig, demo, fit_pipeline, sample, select_records,
};
use tracing_subscriber::EnvFilter;

/// Fit the pipeline on a batch of embeddings and print a stratified sample.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Reduce, tune, cluster and sample a batch of embeddings")]
struct Args {
    /// YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-lines input of `{"id": ..., "embedding": [...]}` records.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Number of records to select (overrides `sampling.budget`).
    #[arg(long)]
    budget: Option<usize>,

    /// Seed for reduction, tuning and sampling (overrides `seed`).
    #[arg(long)]
    seed: Option<u64>,

    /// Tuning objective: stability, dbcv, heuristic or mix.
    #[arg(long)]
    mode: Option<Mode>,

    /// Membership filter: above_mean, below_mean, above_mean_std or none.
    #[arg(long)]
    filter: Option<FilterMode>,

    /// Budget split across clusters: equal or direct_proportion.
    #[arg(long)]
    inter: Option<InterStrategy>,

    /// Draw bias inside a cluster.
    #[arg(long)]
    intra: Option<IntraBias>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    /// Fold command-line overrides into the loaded configuration.
    fn apply(&self, config: &mut StrataConfig) {
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(budget) = self.budget {
            config.sampling.budget = budget;
        }
        if let Some(mode) = self.mode {
            config.tuning.mode = mode.to_string();
        }
        if let Some(filter) = self.filter {
            config.sampling.filter = filter.to_string();
        }
        if let Some(inter) = self.inter {
            config.sampling.inter = inter.to_string();
        }
        if let Some(intra) = self.intra {
            config.sampling.intra = intra.to_string();
        }
    }
}

#[derive(Debug, Deserialize)]
struct Record {
    id: serde_json::Value,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    rows: usize,
    intrinsic_dimension: usize,
    best: HyperparameterCandidate,
    clusters: usize,
    noise: usize,
    selected: Vec<&'a serde_json::Value>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn to_matrix(records: &[Record]) -> anyhow::Result<Array2<f32>> {
    let Some(first) = records.first() else {
        bail!("no records to fit");
    };
    let dim = first.embedding.len();
    let mut flat = Vec::with_capacity(records.len() * dim);
    for (i, r) in records.iter().enumerate() {
        if r.embedding.len() != dim {
            bail!(
                "record {i} has {} dimensions, expected {dim}",
                r.embedding.len()
            );
        }
        flat.extend_from_slice(&r.embedding);
    }
    Ok(Array2::from_shape_vec((records.len(), dim), flat)?)
}

fn demo_records() -> Vec<Record> {
    let (matrix, _) = demo::gaussian_blobs(3, 60, 32, 0.5, 20.0, 42);
    matrix
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| Record {
            id: serde_json::Value::from(format!("demo-{i}")),
            embedding: row.to_vec(),
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = match &args.config {
        Some(path) => StrataConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StrataConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    let pipeline_cfg = config.pipeline_config()?;
    let sampler_cfg = config.sampler_config()?;
    let budget = config.sampling.budget;

    let records = match &args.input {
        Some(path) => read_records(path)?,
        None => {
            tracing::info!("no --input given; using synthetic demo blobs");
            demo_records()
        }
    };
    let matrix = to_matrix(&records)?;

    let pipeline = fit_pipeline(matrix.view(), &pipeline_cfg)?;
    let outcome = sample(pipeline.assignment(), budget, &sampler_cfg)?;
    if let SampleOutcome::Empty(reason) = &outcome {
        tracing::warn!(?reason, "nothing was selected");
    }

    let selected = select_records(&records, outcome.indices())?
        .into_iter()
        .map(|r| &r.id)
        .collect();
    let report = Report {
        rows: records.len(),
        intrinsic_dimension: pipeline.intrinsic_dimension,
        best: pipeline.best,
        clusters: pipeline.n_clusters(),
        noise: pipeline.assignment().noise_count(),
        selected,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn policy_flags_parse_through_their_names() {
        let args = Args::try_parse_from([
            "strata",
            "--budget",
            "25",
            "--mode",
            "DBCV",
            "--filter",
            "below_mean",
            "--inter",
            "equal",
            "--intra",
            "inverse_prob",
            "--seed",
            "7",
        ])
        .unwrap();
        assert_eq!(args.budget, Some(25));
        assert_eq!(args.mode, Some(Mode::Dbcv));
        assert_eq!(args.filter, Some(FilterMode::BelowMean));
        assert_eq!(args.inter, Some(InterStrategy::Equal));
        assert_eq!(args.intra, Some(IntraBias::InverseProb));

        let mut config = StrataConfig::default();
        args.apply(&mut config);
        assert_eq!(config.seed, 7);
        assert_eq!(config.sampling.budget, 25);
        assert_eq!(config.tuning.mode, "dbcv");
        config.validate().unwrap();
        let sampler = config.sampler_config().unwrap();
        assert_eq!(sampler.filter, FilterMode::BelowMean);
        assert_eq!(sampler.seed, 7);
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(Args::try_parse_from(["strata", "--mode", "kmeans"]).is_err());
        assert!(Args::try_parse_from(["strata", "--budget", "ten"]).is_err());
        assert!(Args::try_parse_from(["strata", "--frobnicate"]).is_err());
    }

    #[test]
    fn zero_budget_override_fails_validation() {
        let args = Args::try_parse_from(["strata", "--budget", "0"]).unwrap();
        let mut config = StrataConfig::default();
        args.apply(&mut config);
        assert!(matches!(
            config.validate(),
            Err(strata::ConfigLoadError::Validation(_))
        ));
    }

    #[test]
    fn no_flags_keeps_the_loaded_config() {
        let args = Args::try_parse_from(["strata"]).unwrap();
        let mut config = StrataConfig::default();
        let before = format!("{config:?}");
        args.apply(&mut config);
        assert_eq!(format!("{config:?}"), before);
    }
}
