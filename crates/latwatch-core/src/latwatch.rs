//! latwatch: live RRCF anomaly detection on gateway latency
//!
//! Configured entirely from the environment (see `LatwatchConfig`). Polls the
//! source every `LATWATCH_QUERY_INTERVAL_SECS`, scores stride-1 windows with a
//! Random Cut Forest and redraws a console chart every `LATWATCH_REFRESH_MS`.

use latwatch_core::{
    LatwatchConfig, OpenSearchSource, PollLoop, RandomCutForest, SampleSource, SourceKind,
    StreamingPipeline, SyntheticSource, chart,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CHART_WIDTH: usize = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = LatwatchConfig::from_env()?;
    let p = &config.pipeline;
    info!(
        num_trees = p.num_trees,
        shingle_size = p.shingle_size,
        tree_size = p.tree_size,
        threshold = p.threshold,
        reset_threshold = p.reset_threshold,
        "Starting latwatch"
    );

    let forest = RandomCutForest::with_seed(p.num_trees, p.seed)?;
    let pipeline = StreamingPipeline::new(p.clone(), forest);

    match config.source {
        SourceKind::OpenSearch => {
            let source = OpenSearchSource::new(config.opensearch.clone())?;
            run(source, pipeline, &config).await
        }
        SourceKind::Synthetic => {
            let source =
                SyntheticSource::from_scenario(config.scenario, p.seed, config.synthetic_per_poll);
            run(source, pipeline, &config).await
        }
    }
}

async fn run<S: SampleSource>(
    source: S,
    pipeline: StreamingPipeline<RandomCutForest>,
    config: &LatwatchConfig,
) -> anyhow::Result<()> {
    let (poll_loop, snapshots) = PollLoop::new(source, pipeline, config.query_interval);
    let chart = tokio::spawn(chart::run_console_chart(
        snapshots,
        config.refresh_interval,
        CHART_WIDTH,
    ));

    let result = poll_loop
        .run(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;
    chart.abort();

    let pipeline = result?;
    let stats = pipeline.stats();
    info!(
        samples = stats.samples_seen,
        windows = stats.windows_scored,
        anomalies = stats.anomalies,
        resets = stats.resets,
        idle_rounds = stats.idle_rounds,
        skipped_samples = stats.skipped_samples,
        "latwatch stopped"
    );
    Ok(())
}
