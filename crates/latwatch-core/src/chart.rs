//! Console chart of recent latency and scores.
//!
//! Purely observational: it only ever reads snapshots from the watch
//! channel and redraws on its own cadence.

use crate::pipeline::PipelineSnapshot;
use std::time::Duration;
use tokio::sync::watch;

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render the last `width` values as a unicode sparkline.
pub fn sparkline(values: &[f64], width: usize) -> String {
    let tail = &values[values.len().saturating_sub(width)..];
    let (min, max) = tail
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = max - min;

    tail.iter()
        .map(|&v| {
            if !(span > 0.0) {
                return BARS[3];
            }
            let level = ((v - min) / span * (BARS.len() - 1) as f64).round() as usize;
            BARS[level.min(BARS.len() - 1)]
        })
        .collect()
}

/// Multi-line view of a snapshot: latency, CoDisp and anomaly markers,
/// aligned on the scored windows.
pub fn render(snapshot: &PipelineSnapshot, width: usize) -> String {
    let stats = &snapshot.stats;
    let footer = format!(
        "index {} | live {} | windows {} | anomalies {} | resets {} | idle rounds {}",
        snapshot.current_index,
        snapshot.live_indices,
        stats.windows_scored,
        stats.anomalies,
        stats.resets,
        stats.idle_rounds
    );

    let tail = &snapshot.scores[snapshot.scores.len().saturating_sub(width)..];
    let Some(last) = tail.last().copied() else {
        return format!(
            "waiting for first window ({}/{} samples)\n{}",
            snapshot.pending_samples, snapshot.shingle_size, footer
        );
    };

    let latency: Vec<f64> = tail.iter().map(|r| r.latest_value).collect();
    let scores: Vec<f64> = tail.iter().map(|r| r.score).collect();
    let markers: String = tail
        .iter()
        .map(|r| if r.is_anomaly { '!' } else { ' ' })
        .collect();

    format!(
        "latency  {} {:.1}\ncodisp   {} {:.2} (threshold {})\nanomaly  {}\n{}",
        sparkline(&latency, width),
        last.latest_value,
        sparkline(&scores, width),
        last.score,
        snapshot.threshold,
        markers,
        footer
    )
}

/// Redraw the chart every `refresh` until the pipeline side goes away.
pub async fn run_console_chart(
    mut snapshots: watch::Receiver<PipelineSnapshot>,
    refresh: Duration,
    width: usize,
) {
    let mut ticker = tokio::time::interval(refresh);
    loop {
        ticker.tick().await;
        match snapshots.has_changed() {
            Ok(false) => continue,
            Ok(true) => {
                let view = render(&snapshots.borrow_and_update(), width);
                println!("{view}\n");
            }
            Err(_) => break,
        }
    }
}
