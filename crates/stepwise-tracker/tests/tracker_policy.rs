//! State tracker policy tests: tier handling, consistency guard, window
//! bounds, failure accounting. Uses a scripted knowledge base so every
//! similarity is exact.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use proptest::prelude::*;
use stepwise_tracker::{StateTracker, StepKnowledge, StepMatch, TrackerConfig};
use stepwise_types::{MatchedStep, TrackerAction};

/// Knowledge base that replays a fixed script, one entry per call.
struct ScriptedKb {
    script: Mutex<VecDeque<Option<StepMatch>>>,
}

impl ScriptedKb {
    fn new(entries: Vec<Option<StepMatch>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(entries.into()),
        })
    }
}

#[async_trait]
impl StepKnowledge for ScriptedKb {
    async fn find_matching_step(&self, _text: &str) -> Option<StepMatch> {
        self.script.lock().unwrap().pop_front().flatten()
    }
}

fn hit(task_id: &str, step_index: u32, similarity: f64) -> Option<StepMatch> {
    Some(StepMatch {
        task_id: task_id.to_string(),
        step_index,
        similarity,
        detail: MatchedStep {
            step_title: format!("step {step_index}"),
            ..MatchedStep::default()
        },
    })
}

fn make_tracker(entries: Vec<Option<StepMatch>>) -> StateTracker {
    StateTracker::new(ScriptedKb::new(entries), TrackerConfig::default())
}

#[tokio::test]
async fn low_confidence_is_ignored() {
    let tracker = make_tracker(vec![hit("coffee", 2, 0.32)]);
    let updated = tracker.process_observation("something is happening").await;
    assert!(!updated);
    assert!(tracker.current_state().await.is_none());
    assert!(tracker.window_records().await.is_empty());

    let metric = tracker.latest_metric().await.unwrap();
    assert_eq!(metric.action, TrackerAction::Ignore);
    assert_eq!(metric.consecutive_low_count, 1);
    assert_eq!(tracker.metrics_summary().await.consecutive_low_count, 1);
}

#[tokio::test]
async fn high_confidence_updates_from_empty_history() {
    let tracker = make_tracker(vec![hit("coffee", 1, 0.82)]);
    let updated = tracker.process_observation("grinding the beans").await;
    assert!(updated);

    let state = tracker.current_state().await.unwrap();
    assert_eq!(state.task_id, "coffee");
    assert_eq!(state.step_index, 1);
    assert_eq!(tracker.window_records().await.len(), 1);
    assert_eq!(
        tracker.latest_metric().await.unwrap().action,
        TrackerAction::Update
    );
}

#[tokio::test]
async fn large_forward_jump_is_rejected() {
    let tracker = make_tracker(vec![hit("coffee", 1, 0.82), hit("coffee", 6, 0.85)]);
    assert!(tracker.process_observation("grinding the beans").await);
    let updated = tracker.process_observation("serving the coffee").await;
    assert!(!updated);

    let state = tracker.current_state().await.unwrap();
    assert_eq!(state.step_index, 1);
    assert_eq!(tracker.window_records().await.len(), 1);
    assert_eq!(
        tracker.latest_metric().await.unwrap().action,
        TrackerAction::Observe
    );
}

#[tokio::test]
async fn backward_jump_of_any_size_is_allowed() {
    let tracker = make_tracker(vec![hit("coffee", 9, 0.9), hit("coffee", 1, 0.9)]);
    assert!(tracker.process_observation("almost done now").await);
    assert!(tracker.process_observation("starting over again").await);
    assert_eq!(tracker.current_state().await.unwrap().step_index, 1);
}

#[tokio::test]
async fn window_count_cap_evicts_oldest() {
    let config = TrackerConfig {
        max_window_records: 3,
        ..TrackerConfig::default()
    };
    let kb = ScriptedKb::new(vec![
        hit("coffee", 1, 0.9),
        hit("coffee", 2, 0.9),
        hit("coffee", 3, 0.9),
        hit("coffee", 3, 0.9),
        hit("coffee", 3, 0.9),
    ]);
    let tracker = StateTracker::new(kb, config);
    for _ in 0..5 {
        assert!(tracker.process_observation("making steady progress").await);
    }

    let records = tracker.window_records().await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.step_index == 3));
    let memory = tracker.memory_stats().await;
    assert_eq!(memory.cleanup_count, 2);
    assert_eq!(memory.max_size_reached, 3);
}

#[tokio::test]
async fn medium_confidence_needs_consistent_history() {
    // No history: medium observes without updating.
    let tracker = make_tracker(vec![hit("coffee", 1, 0.5)]);
    assert!(!tracker.process_observation("maybe grinding beans").await);
    assert_eq!(
        tracker.latest_metric().await.unwrap().action,
        TrackerAction::Observe
    );

    // History at 0.9: 0.5 fails the 0.8x heuristic, 0.8 passes it.
    let tracker = make_tracker(vec![
        hit("coffee", 1, 0.9),
        hit("coffee", 2, 0.5),
        hit("coffee", 2, 0.8),
    ]);
    assert!(tracker.process_observation("grinding the beans").await);
    assert!(!tracker.process_observation("pouring water maybe").await);
    assert_eq!(tracker.current_state().await.unwrap().step_index, 1);
    assert!(tracker.process_observation("pouring water now").await);
    assert_eq!(tracker.current_state().await.unwrap().step_index, 2);
}

#[tokio::test]
async fn normalizer_rejection_is_a_recorded_failure() {
    let tracker = make_tracker(vec![]);
    assert!(!tracker.process_observation("!!").await);

    let memory = tracker.memory_stats().await;
    assert_eq!(memory.failure_count, 1);
    assert_eq!(memory.record_count, 0);
    let metric = tracker.latest_metric().await.unwrap();
    assert_eq!(metric.action, TrackerAction::Ignore);
    assert!(metric.similarity.abs() < f64::EPSILON);
}

#[tokio::test]
async fn kb_miss_is_a_recorded_failure() {
    let tracker = make_tracker(vec![None]);
    assert!(!tracker.process_observation("an unrelated scene").await);
    assert_eq!(tracker.memory_stats().await.failure_count, 1);
    assert!(tracker.current_state().await.is_none());
}

#[tokio::test]
async fn consecutive_low_counter_resets_at_threshold_and_on_update() {
    let entries = (0..5).map(|_| hit("coffee", 1, 0.1)).collect();
    let tracker = make_tracker(entries);
    for _ in 0..4 {
        tracker.process_observation("blurry nothing here").await;
    }
    assert_eq!(tracker.metrics_summary().await.consecutive_low_count, 4);
    // Fifth low trips the warning and resets.
    tracker.process_observation("blurry nothing here").await;
    assert_eq!(tracker.metrics_summary().await.consecutive_low_count, 0);

    let tracker = make_tracker(vec![
        hit("coffee", 1, 0.1),
        hit("coffee", 1, 0.1),
        hit("coffee", 1, 0.9),
    ]);
    tracker.process_observation("blurry nothing here").await;
    tracker.process_observation("blurry nothing here").await;
    assert_eq!(tracker.metrics_summary().await.consecutive_low_count, 2);
    assert!(tracker.process_observation("grinding the beans").await);
    assert_eq!(tracker.metrics_summary().await.consecutive_low_count, 0);
}

#[tokio::test]
async fn current_state_tracks_the_window_tail() {
    let tracker = make_tracker(vec![
        hit("coffee", 1, 0.9),
        hit("coffee", 2, 0.3),
        hit("coffee", 2, 0.9),
    ]);

    assert!(tracker.process_observation("grinding the beans").await);
    let after_first = tracker.current_state().await.unwrap();
    let tail = tracker.window_records().await.last().cloned().unwrap();
    assert_eq!(tail.step_index, after_first.step_index);

    // A failed ingest leaves the state untouched.
    assert!(!tracker.process_observation("too blurry to tell").await);
    assert_eq!(tracker.current_state().await.unwrap(), after_first);

    assert!(tracker.process_observation("pouring water now").await);
    let tail = tracker.window_records().await.last().cloned().unwrap();
    assert_eq!(
        tail.step_index,
        tracker.current_state().await.unwrap().step_index
    );
}

#[tokio::test]
async fn history_analysis_counts_tasks_and_steps() {
    let tracker = make_tracker(vec![
        hit("coffee", 1, 0.9),
        hit("coffee", 2, 0.9),
        hit("tea", 1, 0.5),
        hit("tea", 1, 0.9),
    ]);
    for text in [
        "grinding the beans",
        "pouring water now",
        "warming the teapot",
        "warming the teapot",
    ] {
        tracker.process_observation(text).await;
    }
    let analysis = tracker.history_analysis().await;
    assert_eq!(analysis.task_histogram["coffee"], 2);
    assert_eq!(analysis.step_histogram["coffee:2"], 1);
    assert_eq!(analysis.tier_histogram["HIGH"], analysis.total_records as u64);
    assert!(analysis.time_span_minutes >= 0.0);
}

#[tokio::test]
async fn frame_facade_round_trips() {
    let tracker = make_tracker(vec![]);
    assert!(tracker.last_frame().await.is_none());
    tracker.record_frame(vec![0xFF, 0xD8, 0xFF]).await;
    assert_eq!(tracker.last_frame().await.unwrap(), vec![0xFF, 0xD8, 0xFF]);
}

proptest! {
    // Forward jumps beyond 3 within one task are rejected; everything else
    // (ties, small forward moves, arbitrary backward moves) is accepted.
    #[test]
    fn prop_step_jump_guard(last in 0u32..30, proposed in 0u32..30) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let tracker = make_tracker(vec![
                hit("coffee", last, 0.9),
                hit("coffee", proposed, 0.9),
            ]);
            assert!(tracker.process_observation("setting the scene here").await);
            let updated = tracker.process_observation("the next observation").await;
            let accepted = !(proposed > last && proposed - last > 3);
            assert_eq!(updated, accepted, "last={last} proposed={proposed}");
        });
    }
}
