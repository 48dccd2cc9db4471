use async_trait::async_trait;
use latwatch_core::{
    OracleError, PipelineConfig, PipelineError, PollLoop, RandomCutForest, RoundOutcome, Sample,
    SampleBatch, SampleSource, ScoreOracle, SourceError, StreamingPipeline, Window,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    /// index, window, live count just before the insert
    Insert(u64, Vec<f64>, usize),
    Forget(u64, bool),
    Rebuild,
}

/// Oracle that scores each window with its newest value and logs every call.
struct RecordingOracle {
    live: BTreeMap<u64, Vec<f64>>,
    log: Arc<Mutex<Vec<Call>>>,
    fail_rebuild: bool,
    fail_insert_once: Option<u64>,
}

impl RecordingOracle {
    fn new() -> (Self, Arc<Mutex<Vec<Call>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let oracle = Self {
            live: BTreeMap::new(),
            log: log.clone(),
            fail_rebuild: false,
            fail_insert_once: None,
        };
        (oracle, log)
    }

    fn live_indices(&self) -> Vec<u64> {
        self.live.keys().copied().collect()
    }
}

impl ScoreOracle for RecordingOracle {
    fn insert(&mut self, window: &Window, index: u64) -> Result<(), OracleError> {
        if self.fail_insert_once == Some(index) {
            self.fail_insert_once = None;
            return Err(OracleError::Other("injected".to_string()));
        }
        if self.live.contains_key(&index) {
            return Err(OracleError::DuplicateIndex(index));
        }
        self.log.lock().unwrap().push(Call::Insert(
            index,
            window.as_slice().to_vec(),
            self.live.len(),
        ));
        self.live.insert(index, window.as_slice().to_vec());
        Ok(())
    }

    fn member_scores(&self, index: u64) -> Result<Vec<f64>, OracleError> {
        let window = self.live.get(&index).ok_or(OracleError::UnknownIndex(index))?;
        let latest = window.last().copied().unwrap_or_default();
        Ok(vec![latest; 3])
    }

    fn forget(&mut self, index: u64) -> bool {
        let removed = self.live.remove(&index).is_some();
        self.log.lock().unwrap().push(Call::Forget(index, removed));
        removed
    }

    fn contains(&self, index: u64) -> bool {
        self.live.contains_key(&index)
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }

    fn rebuild(&self) -> Result<Self, OracleError> {
        if self.fail_rebuild {
            return Err(OracleError::EmptyEnsemble);
        }
        self.log.lock().unwrap().push(Call::Rebuild);
        Ok(Self {
            live: BTreeMap::new(),
            log: self.log.clone(),
            fail_rebuild: false,
            fail_insert_once: None,
        })
    }
}

fn config(shingle_size: usize, tree_size: usize, reset_threshold: u64) -> PipelineConfig {
    PipelineConfig {
        num_trees: 3,
        shingle_size,
        tree_size,
        threshold: 100.0,
        reset_threshold,
        seed: Some(7),
    }
}

fn inserts(log: &Arc<Mutex<Vec<Call>>>) -> Vec<(u64, Vec<f64>)> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|c| match c {
            Call::Insert(i, w, _) => Some((*i, w.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn test_first_window_after_shingle_size_samples() {
    let (oracle, log) = RecordingOracle::new();
    let mut pipeline = StreamingPipeline::new(config(4, 8, 1_000), oracle);

    for s in [1.0, 2.0, 3.0] {
        assert!(pipeline.push_value(s).unwrap().is_none());
    }
    assert!(inserts(&log).is_empty());

    let r0 = pipeline.push_value(4.0).unwrap().unwrap();
    let r1 = pipeline.push_value(5.0).unwrap().unwrap();

    assert_eq!((r0.index, r1.index), (0, 1));
    assert_eq!(
        inserts(&log),
        vec![(0, vec![1.0, 2.0, 3.0, 4.0]), (1, vec![2.0, 3.0, 4.0, 5.0])]
    );
    assert_eq!(r1.score, 5.0);
}

#[test]
fn test_oldest_index_forgotten_at_capacity() {
    let (oracle, log) = RecordingOracle::new();
    let mut pipeline = StreamingPipeline::new(config(1, 2, 1_000), oracle);

    for s in [10.0, 20.0, 30.0] {
        pipeline.push_value(s).unwrap();
    }

    let calls = log.lock().unwrap().clone();
    let forget_at = calls.iter().position(|c| *c == Call::Forget(0, true)).unwrap();
    let insert_2 = calls
        .iter()
        .position(|c| matches!(c, Call::Insert(2, _, _)))
        .unwrap();
    assert!(forget_at < insert_2);
    assert_eq!(pipeline.oracle().live_indices(), vec![1, 2]);
}

#[test]
fn test_live_set_is_latest_capacity_indices() {
    let (oracle, log) = RecordingOracle::new();
    let capacity = 5;
    let mut pipeline = StreamingPipeline::new(config(3, capacity, 1_000_000), oracle);

    // Irregular bursts, as a raw-mode source would deliver them.
    let bursts = [0usize, 7, 1, 0, 0, 12, 3, 1, 9];
    let mut value = 0.0;
    for burst in bursts {
        let batch: Vec<Sample> = (0..burst)
            .map(|_| {
                value += 1.0;
                Sample::now(value)
            })
            .collect();
        pipeline.process_batch(&batch).unwrap();

        let submitted = pipeline.current_index();
        let expected: Vec<u64> = (submitted.saturating_sub(capacity as u64)..submitted).collect();
        assert_eq!(pipeline.oracle().live_indices(), expected);
    }

    // Never more than capacity - 1 live when a new index goes in.
    for call in log.lock().unwrap().iter() {
        if let Call::Insert(_, _, live_before) = call {
            assert!(*live_before < capacity);
        }
    }

    let indices: Vec<u64> = inserts(&log).iter().map(|(i, _)| *i).collect();
    let expected: Vec<u64> = (0..indices.len() as u64).collect();
    assert_eq!(indices, expected);
}

#[test]
fn test_full_reset_restarts_index_and_keeps_shingle() {
    let (oracle, log) = RecordingOracle::new();
    let mut pipeline = StreamingPipeline::new(config(3, 8, 5), oracle);

    // 7 samples -> windows at indices 0..=4
    for s in 1..=7 {
        pipeline.push_value(s as f64).unwrap();
    }
    assert_eq!(pipeline.current_index(), 5);
    assert_eq!(pipeline.shingle().contents(), vec![5.0, 6.0, 7.0]);

    let record = pipeline.push_value(8.0).unwrap().unwrap();

    assert_eq!(record.index, 0);
    assert_eq!(pipeline.current_index(), 1);
    assert_eq!(pipeline.stats().resets, 1);
    assert_eq!(pipeline.scores().len(), 1);

    let calls = log.lock().unwrap().clone();
    let rebuild_at = calls.iter().position(|c| *c == Call::Rebuild).unwrap();
    // First insert after the reset sees an empty oracle and the continued window.
    assert_eq!(
        calls[rebuild_at + 1],
        Call::Insert(0, vec![6.0, 7.0, 8.0], 0)
    );
    assert_eq!(pipeline.oracle().live_indices(), vec![0]);
}

#[test]
fn test_reset_failure_is_fatal() {
    let (mut oracle, _log) = RecordingOracle::new();
    oracle.fail_rebuild = true;
    let mut pipeline = StreamingPipeline::new(config(1, 8, 2), oracle);

    let batch: Vec<Sample> = [1.0, 2.0, 3.0, 4.0].into_iter().map(Sample::now).collect();
    let err = pipeline.process_batch(&batch).unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(err, PipelineError::ResetFailed(OracleError::EmptyEnsemble));
    assert_eq!(pipeline.current_index(), 2);
}

#[test]
fn test_failed_insert_does_not_consume_index() {
    let (mut oracle, _log) = RecordingOracle::new();
    oracle.fail_insert_once = Some(1);
    let mut pipeline = StreamingPipeline::new(config(1, 8, 1_000), oracle);

    let batch: Vec<Sample> = [1.0, 2.0, 3.0].into_iter().map(Sample::now).collect();
    let report = pipeline.process_batch(&batch).unwrap();

    assert_eq!(report.errors.len(), 1);
    assert!(!report.errors[0].is_fatal());
    let indices: Vec<u64> = report.scored.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert_eq!(pipeline.stats().oracle_errors, 1);
}

#[test]
fn test_double_forget_leaves_scores_untouched() {
    let mut forest = RandomCutForest::with_seed(10, Some(3)).unwrap();
    for i in 0..20u64 {
        let w = Window::new(vec![(i as f64).sin(), (i as f64).cos()]);
        forest.insert(&w, i).unwrap();
    }

    assert!(forest.forget(4));
    let before = forest.score(12).unwrap();
    assert!(!forest.forget(4));
    assert!(!forest.forget(4));
    assert_eq!(forest.score(12).unwrap(), before);
    assert_eq!(forest.live_count(), 19);
}

#[test]
fn test_forest_pipeline_survives_reset() {
    let mut pipeline = StreamingPipeline::with_forest(PipelineConfig {
        num_trees: 5,
        shingle_size: 4,
        tree_size: 6,
        threshold: 50.0,
        reset_threshold: 10,
        seed: Some(21),
    })
    .unwrap();

    for i in 0..40 {
        pipeline.push_value((i as f64 * 0.3).sin() * 10.0).unwrap();
    }

    // 37 windows: indices 0..=9, reset, 0..=9, reset, 0..=9, reset, 0..=6
    assert_eq!(pipeline.stats().windows_scored, 37);
    assert_eq!(pipeline.stats().resets, 3);
    assert_eq!(pipeline.current_index(), 7);
    assert_eq!(pipeline.oracle().live_count(), 6);
    assert!((1..7).all(|i| pipeline.oracle().contains(i)));
}

/// Replays a fixed script of poll results, then reports no data.
struct ScriptedSource {
    script: VecDeque<Result<SampleBatch, SourceError>>,
}

impl ScriptedSource {
    fn new(script: Vec<Result<SampleBatch, SourceError>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl SampleSource for ScriptedSource {
    async fn poll(&mut self) -> Result<SampleBatch, SourceError> {
        self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn batch(values: &[f64]) -> SampleBatch {
    values.iter().copied().map(Sample::now).collect()
}

#[tokio::test]
async fn test_idle_polls_change_nothing() {
    let (oracle, _log) = RecordingOracle::new();
    let pipeline = StreamingPipeline::new(config(3, 8, 1_000), oracle);
    let source = ScriptedSource::new(vec![
        Ok(batch(&[1.0, 2.0, 3.0, 4.0])),
        Ok(Vec::new()),
        Err(SourceError::Decode("connection reset".to_string())),
        Ok(Vec::new()),
    ]);
    let (mut poll_loop, snapshots) = PollLoop::new(source, pipeline, Duration::from_millis(1));

    let first = poll_loop.poll_once().await.unwrap();
    assert!(matches!(first, RoundOutcome::Processed(ref r) if r.scored.len() == 2));

    let index = poll_loop.pipeline().current_index();
    let pending = poll_loop.pipeline().shingle().contents();
    let scores = poll_loop.pipeline().scores().to_vec();

    assert_eq!(poll_loop.poll_once().await.unwrap(), RoundOutcome::Idle);
    assert!(matches!(
        poll_loop.poll_once().await.unwrap(),
        RoundOutcome::SourceFailed(_)
    ));
    assert_eq!(poll_loop.poll_once().await.unwrap(), RoundOutcome::Idle);

    let pipeline = poll_loop.pipeline();
    assert_eq!(pipeline.current_index(), index);
    assert_eq!(pipeline.shingle().contents(), pending);
    assert_eq!(pipeline.scores().to_vec(), scores);
    assert_eq!(pipeline.stats().idle_rounds, 3);

    let snapshot = snapshots.borrow().clone();
    assert_eq!(snapshot.current_index, index);
    assert_eq!(snapshot.stats.idle_rounds, 3);
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let (oracle, _log) = RecordingOracle::new();
    let pipeline = StreamingPipeline::new(config(2, 8, 1_000), oracle);
    let source = ScriptedSource::new(vec![
        Ok(batch(&[1.0, 2.0])),
        Err(SourceError::Decode("timeout".to_string())),
        Ok(batch(&[3.0, 4.0, 5.0])),
    ]);
    let (poll_loop, snapshots) = PollLoop::new(source, pipeline, Duration::from_millis(1));

    let pipeline = poll_loop
        .run(tokio::time::sleep(Duration::from_millis(250)))
        .await
        .unwrap();

    assert_eq!(pipeline.current_index(), 4);
    assert_eq!(pipeline.stats().samples_seen, 5);
    assert_eq!(snapshots.borrow().current_index, 4);
}

#[tokio::test]
async fn test_run_stops_on_failed_reset() {
    let (mut oracle, _log) = RecordingOracle::new();
    oracle.fail_rebuild = true;
    let pipeline = StreamingPipeline::new(config(1, 8, 1), oracle);
    let source = ScriptedSource::new(vec![Ok(batch(&[1.0, 2.0]))]);
    let (poll_loop, _snapshots) = PollLoop::new(source, pipeline, Duration::from_millis(1));

    let result = poll_loop.run(std::future::pending::<()>()).await;

    assert!(matches!(result, Err(PipelineError::ResetFailed(_))));
}
