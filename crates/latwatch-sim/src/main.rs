//! latwatch-sim - offline scoring of synthetic latency series
//!
//! Usage:
//!   latwatch-sim score --scenario sine-plateau --shingle-size 16
//!   latwatch-sim score --scenario noisy-spikes --format csv --seed 7
//!   latwatch-sim list

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use latwatch_core::{
    PipelineConfig, RandomCutForest, ScenarioKind, ScoreRecord, SyntheticSeries, score_series,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "latwatch-sim")]
#[command(about = "Score synthetic latency scenarios with a Random Cut Forest")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a scenario and score every window
    Score {
        #[arg(short, long, default_value = "sine-plateau")]
        scenario: ScenarioKind,

        /// Number of samples (defaults to the scenario's own length)
        #[arg(short, long)]
        len: Option<usize>,

        #[arg(long, default_value = "40")]
        num_trees: usize,

        #[arg(long, default_value = "16")]
        shingle_size: usize,

        #[arg(long, default_value = "256")]
        tree_size: usize,

        #[arg(short, long, default_value = "10")]
        threshold: f64,

        #[arg(long, default_value = "1000000")]
        reset_threshold: u64,

        /// Seed for both the series and the forest
        #[arg(long)]
        seed: Option<u64>,

        /// Only print windows above the threshold
        #[arg(long)]
        anomalies_only: bool,

        #[arg(short, long, default_value = "json-lines")]
        format: OutputFormat,
    },

    /// List available scenarios
    List,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    JsonLines,
    Csv,
}

#[derive(Serialize)]
struct Summary<'a> {
    scenario: &'a str,
    samples: usize,
    windows: usize,
    anomalies: usize,
    max_score: f64,
    records: &'a [ScoreRecord],
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            scenario,
            len,
            num_trees,
            shingle_size,
            tree_size,
            threshold,
            reset_threshold,
            seed,
            anomalies_only,
            format,
        } => {
            let config = PipelineConfig {
                num_trees,
                shingle_size,
                tree_size,
                threshold,
                reset_threshold,
                seed,
            };
            run_score(scenario, len.unwrap_or(scenario.default_len()), config, anomalies_only, format)
        }
        Commands::List => {
            run_list();
            Ok(())
        }
    }
}

fn run_score(
    scenario: ScenarioKind,
    len: usize,
    config: PipelineConfig,
    anomalies_only: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    config.validate().context("invalid pipeline parameters")?;

    let values = SyntheticSeries::new(scenario.generator(), config.seed).take(len);
    let forest = RandomCutForest::with_seed(config.num_trees, config.seed)?;
    let records = score_series(&values, config, forest)?;

    let anomalies = records.iter().filter(|r| r.is_anomaly).count();
    let max_score = records.iter().map(|r| r.score).fold(0.0, f64::max);
    info!(
        scenario = %scenario,
        samples = values.len(),
        windows = records.len(),
        anomalies,
        max_score,
        "Scoring finished"
    );

    let shown: Vec<ScoreRecord> = records
        .iter()
        .filter(|r| !anomalies_only || r.is_anomaly)
        .copied()
        .collect();

    match format {
        OutputFormat::Json => {
            let summary = Summary {
                scenario: scenario.name(),
                samples: values.len(),
                windows: records.len(),
                anomalies,
                max_score,
                records: &shown,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::JsonLines => {
            for record in &shown {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        OutputFormat::Csv => {
            println!("index,value,score,is_anomaly");
            for r in &shown {
                println!("{},{},{:.4},{}", r.index, r.latest_value, r.score, r.is_anomaly);
            }
        }
    }
    Ok(())
}

fn run_list() {
    println!("Available scenarios:");
    for kind in ScenarioKind::ALL {
        println!("  {:<14} {:>5} samples  {}", kind.name(), kind.default_len(), kind.description());
    }
}
