//! # latwatch-core
//!
//! Streaming anomaly detection for API-gateway latency.
//!
//! ```text
//!   SampleSource ──poll──▶ StreamingPipeline ──snapshot──▶ console chart
//!                           │  ShingleBuffer (stride-1 windows)
//!                           │  ScoreOracle   (RRCF, FIFO by index)
//!                           │  ScoreHistory  (last tree_size scores)
//! ```
//!
//! The pipeline owns all mutable state. The poll loop drives it from a single
//! task and publishes read-only snapshots for presentation.

pub mod algo;
pub mod chart;
pub mod config;
pub mod error;
pub mod history;
pub mod monitor;
pub mod oracle;
pub mod pipeline;
pub mod shingle;
pub mod source;
pub mod synthetic;

pub use algo::RandomCutForest;
pub use config::{LatwatchConfig, OpenSearchConfig, PipelineConfig, SourceKind, SourceMode};
pub use error::{ConfigError, OracleError, PipelineError, SourceError};
pub use history::{ScoreHistory, ScoreRecord};
pub use monitor::{PollLoop, RoundOutcome};
pub use oracle::ScoreOracle;
pub use pipeline::{PipelineSnapshot, PipelineStats, RoundReport, StreamingPipeline, score_series};
pub use shingle::{ShingleBuffer, Window};
pub use source::{OpenSearchSource, Sample, SampleBatch, SampleSource};
pub use synthetic::{ScenarioKind, SyntheticSeries, SyntheticSource};
