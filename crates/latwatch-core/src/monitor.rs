//! Poll loop: source -> pipeline -> snapshot channel.
//!
//! One task owns the pipeline. Each cycle polls the source, processes the
//! batch to completion (including any full reset) and publishes a snapshot
//! before the next tick is awaited, so cycles never overlap.

use crate::error::PipelineError;
use crate::oracle::ScoreOracle;
use crate::pipeline::{PipelineSnapshot, RoundReport, StreamingPipeline};
use crate::source::SampleSource;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// What happened in one poll cycle
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The source answered with no samples
    Idle,
    /// The source failed; handled as an idle round
    SourceFailed(String),
    Processed(RoundReport),
}

pub struct PollLoop<S: SampleSource, O: ScoreOracle> {
    source: S,
    pipeline: StreamingPipeline<O>,
    interval: Duration,
    snapshots: watch::Sender<PipelineSnapshot>,
    rounds: u64,
}

impl<S: SampleSource, O: ScoreOracle> PollLoop<S, O> {
    pub fn new(
        source: S,
        pipeline: StreamingPipeline<O>,
        interval: Duration,
    ) -> (Self, watch::Receiver<PipelineSnapshot>) {
        let (snapshots, rx) = watch::channel(pipeline.snapshot());
        let poll_loop = Self {
            source,
            pipeline,
            interval,
            snapshots,
            rounds: 0,
        };
        (poll_loop, rx)
    }

    pub fn pipeline(&self) -> &StreamingPipeline<O> {
        &self.pipeline
    }

    /// Run one poll-process-publish cycle.
    ///
    /// Returns `Err` only for a fatal pipeline error.
    pub async fn poll_once(&mut self) -> Result<RoundOutcome, PipelineError> {
        self.rounds += 1;
        let round = self.rounds;

        let outcome = match self.source.poll().await {
            Err(e) => {
                warn!(round, error = %e, "Source query failed, treating round as empty");
                self.pipeline.record_idle();
                RoundOutcome::SourceFailed(e.to_string())
            }
            Ok(batch) => {
                let report = self.pipeline.process_batch(&batch).inspect_err(|e| {
                    error!(round, error = %e, "Fatal pipeline error, stopping");
                })?;

                if report.is_idle() {
                    info!(round, current_index = self.pipeline.current_index(), "No new samples this round");
                    RoundOutcome::Idle
                } else {
                    for e in &report.errors {
                        warn!(round, error = %e, "Window skipped");
                    }
                    info!(
                        round,
                        samples = report.samples,
                        scored = report.scored.len(),
                        anomalies = report.anomalies().count(),
                        current_index = self.pipeline.current_index(),
                        "Round processed"
                    );
                    RoundOutcome::Processed(report)
                }
            }
        };

        self.snapshots.send_replace(self.pipeline.snapshot());
        Ok(outcome)
    }

    /// Poll every `interval` until `shutdown` resolves or a fatal error
    /// occurs. Hands the pipeline back on clean shutdown.
    pub async fn run<F>(mut self, shutdown: F) -> Result<StreamingPipeline<O>, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            source = %self.source.describe(),
            interval_ms = self.interval.as_millis() as u64,
            "Poll loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(rounds = self.rounds, "Poll loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await?;
                }
            }
        }

        Ok(self.pipeline)
    }
}
