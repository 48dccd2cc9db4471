//! Streaming windowing and bounded-state scoring.
//!
//! Every sample goes through the shingle buffer one at a time. Each window
//! that forms is scored exactly once under the next running index:
//!
//! 1. full reset if the index has reached `reset_threshold`
//! 2. forget `index - tree_size` once `tree_size` windows are live
//! 3. insert, then read the ensemble mean
//! 4. record `(index, score)` and advance the index
//!
//! Eviction is relative to the index, never to wall-clock time, so the live
//! set is always exactly the latest `tree_size` windows no matter how bursty
//! the polling is.

use crate::algo::RandomCutForest;
use crate::config::PipelineConfig;
use crate::error::{OracleError, PipelineError};
use crate::history::{SampleHistory, ScoreHistory, ScoreRecord};
use crate::oracle::ScoreOracle;
use crate::shingle::{ShingleBuffer, Window};
use crate::source::Sample;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Running counters, never reset
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub samples_seen: u64,
    pub windows_scored: u64,
    pub anomalies: u64,
    pub resets: u64,
    pub idle_rounds: u64,
    pub oracle_errors: u64,
    /// NaN or infinite samples dropped before windowing
    pub skipped_samples: u64,
}

/// Outcome of processing one polled batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundReport {
    pub samples: usize,
    pub scored: Vec<ScoreRecord>,
    /// Recoverable failures; later samples in the batch were still processed
    pub errors: Vec<PipelineError>,
}

impl RoundReport {
    pub fn is_idle(&self) -> bool {
        self.samples == 0
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &ScoreRecord> {
        self.scored.iter().filter(|r| r.is_anomaly)
    }
}

/// Self-contained copy of the pipeline state for presentation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub samples: Vec<f64>,
    pub scores: Vec<ScoreRecord>,
    pub threshold: f64,
    pub current_index: u64,
    pub live_indices: usize,
    pub pending_samples: usize,
    pub shingle_size: usize,
    pub stats: PipelineStats,
}

pub struct StreamingPipeline<O: ScoreOracle> {
    config: PipelineConfig,
    shingle: ShingleBuffer,
    oracle: O,
    current_index: u64,
    scores: ScoreHistory,
    samples: SampleHistory,
    stats: PipelineStats,
}

impl StreamingPipeline<RandomCutForest> {
    /// Pipeline over a freshly built [`RandomCutForest`]
    pub fn with_forest(config: PipelineConfig) -> Result<Self, OracleError> {
        let forest = RandomCutForest::with_seed(config.num_trees, config.seed)?;
        Ok(Self::new(config, forest))
    }
}

impl<O: ScoreOracle> StreamingPipeline<O> {
    pub fn new(config: PipelineConfig, oracle: O) -> Self {
        Self {
            shingle: ShingleBuffer::new(config.shingle_size),
            scores: ScoreHistory::new(config.tree_size),
            samples: SampleHistory::new(config.tree_size + config.shingle_size),
            oracle,
            current_index: 0,
            stats: PipelineStats::default(),
            config,
        }
    }

    /// Feed one polled batch, sample by sample, in arrival order.
    ///
    /// Only a failed full reset is returned as `Err`; recoverable oracle
    /// failures are collected in the report.
    pub fn process_batch(&mut self, batch: &[Sample]) -> Result<RoundReport, PipelineError> {
        let mut report = RoundReport {
            samples: batch.len(),
            ..RoundReport::default()
        };
        if batch.is_empty() {
            self.record_idle();
            return Ok(report);
        }

        for sample in batch {
            match self.push_sample(sample) {
                Ok(Some(record)) => report.scored.push(record),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.errors.push(e),
            }
        }
        Ok(report)
    }

    pub fn push_sample(&mut self, sample: &Sample) -> Result<Option<ScoreRecord>, PipelineError> {
        self.push_value(sample.value)
    }

    /// Push one value; returns the score record if a window formed.
    ///
    /// Non-finite values are dropped as if they were never observed.
    pub fn push_value(&mut self, value: f64) -> Result<Option<ScoreRecord>, PipelineError> {
        if !value.is_finite() {
            self.stats.skipped_samples += 1;
            debug!(value, "Skipping non-finite sample");
            return Ok(None);
        }
        self.stats.samples_seen += 1;
        self.samples.push(value);
        match self.shingle.push(value) {
            Some(window) => self.score_window(&window).map(Some),
            None => Ok(None),
        }
    }

    fn score_window(&mut self, window: &Window) -> Result<ScoreRecord, PipelineError> {
        if self.current_index >= self.config.reset_threshold {
            self.reset()?;
        }

        let index = self.current_index;
        let capacity = self.config.tree_size as u64;
        if index >= capacity {
            let oldest = index - capacity;
            if !self.oracle.forget(oldest) {
                debug!(index = oldest, "Evicted index was not live");
            }
        }

        if let Err(source) = self.oracle.insert(window, index) {
            self.stats.oracle_errors += 1;
            return Err(PipelineError::Oracle { index, source });
        }
        // The index is occupied from here on, even if scoring fails.
        self.current_index += 1;

        let score = self.oracle.score(index).map_err(|source| {
            self.stats.oracle_errors += 1;
            PipelineError::Oracle { index, source }
        })?;

        let record = ScoreRecord {
            index,
            score,
            latest_value: window.latest().unwrap_or_default(),
            is_anomaly: score > self.config.threshold,
        };
        self.scores.push(record);
        self.stats.windows_scored += 1;

        if record.is_anomaly {
            self.stats.anomalies += 1;
            warn!(
                index,
                score = format_args!("{:.2}", score),
                value = record.latest_value,
                threshold = self.config.threshold,
                "Anomaly detected"
            );
        } else {
            debug!(index, score, value = record.latest_value, "Window scored");
        }
        Ok(record)
    }

    /// Discard the oracle and restart indexing at 0.
    ///
    /// The shingle buffer and sample history survive so windowing continues
    /// seamlessly across the reset.
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        let fresh = self.oracle.rebuild().map_err(|e| {
            error!(error = %e, "Could not rebuild forest");
            PipelineError::ResetFailed(e)
        })?;
        let retired = self.current_index;
        self.oracle = fresh;
        self.current_index = 0;
        self.scores.clear();
        self.stats.resets += 1;
        info!(
            retired_indices = retired,
            resets = self.stats.resets,
            "Forest reset to bound memory growth"
        );
        Ok(())
    }

    pub fn record_idle(&mut self) {
        self.stats.idle_rounds += 1;
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            samples: self.samples.to_vec(),
            scores: self.scores.to_vec(),
            threshold: self.config.threshold,
            current_index: self.current_index,
            live_indices: self.oracle.live_count(),
            pending_samples: self.shingle.len(),
            shingle_size: self.shingle.shingle_size(),
            stats: self.stats.clone(),
        }
    }

    pub fn current_index(&self) -> u64 {
        self.current_index
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn shingle(&self) -> &ShingleBuffer {
        &self.shingle
    }

    pub fn scores(&self) -> &ScoreHistory {
        &self.scores
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

/// Score a finite series offline through the streaming path.
pub fn score_series<O: ScoreOracle>(
    values: &[f64],
    config: PipelineConfig,
    oracle: O,
) -> Result<Vec<ScoreRecord>, PipelineError> {
    let mut pipeline = StreamingPipeline::new(config, oracle);
    let mut records = Vec::with_capacity(values.len());
    for &value in values {
        if let Some(record) = pipeline.push_value(value)? {
            records.push(record);
        }
    }
    Ok(records)
}
