//! State tracker: confidence-tiered updates over a bounded window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use stepwise_types::{ConfidenceTier, StateRecord, StateSnapshot, TrackError, TrackerAction};
use stepwise_window::{ObservationWindow, WindowStats};

use crate::kb::{StepKnowledge, StepMatch};
use crate::metrics::{MetricsLog, MetricsSummary, ProcessingMetric};
use crate::normalize::normalize;

/// Structured event tags for tracker logs.
#[derive(Debug, Clone, Copy)]
pub enum TrackerEvent {
    /// State replaced with a new record.
    StateUpdated,
    /// Observation noted, state unchanged.
    ObservationObserved,
    /// Observation discarded.
    ObservationIgnored,
    /// Update refused by the step-jump guard.
    ConsistencyRejected,
    /// Consecutive-low counter hit its threshold.
    ConsecutiveLowWarning,
    /// Observation produced no usable state (normalizer or KB).
    ObservationFailed,
}

impl TrackerEvent {
    /// Stable tag for log filtering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StateUpdated => "state_updated",
            Self::ObservationObserved => "observation_observed",
            Self::ObservationIgnored => "observation_ignored",
            Self::ConsistencyRejected => "consistency_rejected",
            Self::ConsecutiveLowWarning => "consecutive_low_warning",
            Self::ObservationFailed => "observation_failed",
        }
    }
}

/// Tracker tunables. Defaults match the documented policy.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Similarity at or above this is HIGH.
    pub high_confidence_threshold: f64,
    /// Similarity at or above this (and below high) is MEDIUM.
    pub medium_confidence_threshold: f64,
    /// Observation window record cap.
    pub max_window_records: usize,
    /// Observation window byte cap.
    pub max_window_bytes: usize,
    /// Full-record history cap.
    pub max_history: usize,
    /// Processing-metric cap.
    pub max_metrics: usize,
    /// Consecutive LOW observations before a warning is emitted.
    pub max_consecutive_low: u32,
    /// Largest accepted forward step jump within one task.
    pub max_forward_jump: u32,
    /// How many recent window entries the guard scans.
    pub guard_scan: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.70,
            medium_confidence_threshold: 0.40,
            max_window_records: 50,
            max_window_bytes: 1024 * 1024,
            max_history: 10,
            max_metrics: 100,
            max_consecutive_low: 5,
            max_forward_jump: 3,
            guard_scan: 5,
        }
    }
}

/// Window memory accounting plus ingest failure count.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryStats {
    /// Records currently in the window.
    pub record_count: usize,
    /// Estimated window bytes.
    pub estimated_bytes: usize,
    /// Records evicted by cleanup since start.
    pub cleanup_count: u64,
    /// High-water record count.
    pub max_size_reached: usize,
    /// Mean estimated record size.
    pub avg_record_bytes: f64,
    /// Observations that produced no update (normalizer/KB failures).
    /// Tracked outside the window; failures never occupy window capacity.
    pub failure_count: u64,
}

/// Distribution analysis over the observation window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryAnalysis {
    /// Records per task.
    pub task_histogram: HashMap<String, u64>,
    /// Records per "task:step" pair.
    pub step_histogram: HashMap<String, u64>,
    /// Records per confidence tier.
    pub tier_histogram: HashMap<String, u64>,
    /// Records analyzed.
    pub total_records: usize,
    /// Minutes between the oldest and newest window record.
    pub time_span_minutes: f64,
}

/// Comprehensive tracker summary for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StateSummary {
    /// Whether a current state exists.
    pub has_current_state: bool,
    /// Full-record history length.
    pub history_len: usize,
    /// Observation window length.
    pub window_len: usize,
    /// HIGH threshold in effect.
    pub high_confidence_threshold: f64,
    /// MEDIUM threshold in effect.
    pub medium_confidence_threshold: f64,
    /// Current state, when any.
    pub current_state: Option<StateRecord>,
    /// Metric aggregates.
    pub metrics: MetricsSummary,
    /// Window memory accounting.
    pub memory: MemoryStats,
}

struct TrackerCore {
    current_state: Option<StateRecord>,
    history: VecDeque<StateRecord>,
    window: ObservationWindow,
    metrics: MetricsLog,
    failure_count: u64,
    consecutive_low: u32,
    last_frame: Option<Vec<u8>>,
}

/// Owns the current state, the observation window, and the metrics log.
/// Cheap to clone; writers take exclusive access for one whole update, so
/// readers see either the pre-update or the post-update state, never a
/// torn one.
#[derive(Clone)]
pub struct StateTracker {
    kb: Arc<dyn StepKnowledge>,
    config: TrackerConfig,
    core: Arc<RwLock<TrackerCore>>,
}

impl StateTracker {
    /// Create a tracker over the given knowledge base.
    #[must_use]
    pub fn new(kb: Arc<dyn StepKnowledge>, config: TrackerConfig) -> Self {
        let core = TrackerCore {
            current_state: None,
            history: VecDeque::with_capacity(config.max_history),
            window: ObservationWindow::new(config.max_window_records, config.max_window_bytes),
            metrics: MetricsLog::new(config.max_metrics),
            failure_count: 0,
            consecutive_low: 0,
            last_frame: None,
        };
        Self {
            kb,
            config,
            core: Arc::new(RwLock::new(core)),
        }
    }

    /// Ingest one observation. Returns whether the state changed.
    ///
    /// Never fails: normalizer and knowledge-base misses are recorded as
    /// IGNORE metrics and collapse into `false`.
    pub async fn process_observation(&self, raw: &str) -> bool {
        let started = Instant::now();

        let Some(cleaned) = normalize(raw) else {
            let error = TrackError::InputRejected("unusable after cleaning".to_string());
            self.record_failure(raw, &error, started).await;
            return false;
        };

        let Some(matched) = self.kb.find_matching_step(&cleaned).await else {
            self.record_failure(&cleaned, &TrackError::NoMatch, started).await;
            return false;
        };

        self.apply_match(&cleaned, matched, started).await
    }

    async fn apply_match(&self, cleaned: &str, matched: StepMatch, started: Instant) -> bool {
        let tier = self.classify(matched.similarity);
        let mut core = self.core.write().await;

        let mut action = TrackerAction::Ignore;
        let mut updated = false;

        let should_update = match tier {
            ConfidenceTier::High => true,
            ConfidenceTier::Medium => match core.history.back() {
                Some(last) => matched.similarity > 0.8 * last.similarity,
                None => false,
            },
            ConfidenceTier::Low => false,
        };

        if should_update {
            if self.passes_consistency_guard(&core, &matched) {
                let record = StateRecord {
                    timestamp: Utc::now(),
                    cleaned_text: cleaned.to_string(),
                    task_id: matched.task_id.clone(),
                    step_index: matched.step_index,
                    similarity: matched.similarity,
                    matched_step: matched.detail.clone(),
                };
                core.history.push_back(record.clone());
                while core.history.len() > self.config.max_history {
                    let _ = core.history.pop_front();
                }
                core.window.append(stepwise_window::WindowRecord::new(
                    record.timestamp,
                    &record.task_id,
                    record.step_index,
                    record.similarity,
                ));
                core.current_state = Some(record);
                core.consecutive_low = 0;
                action = TrackerAction::Update;
                updated = true;
                tracing::info!(
                    event = TrackerEvent::StateUpdated.as_str(),
                    task_id = %matched.task_id,
                    step_index = matched.step_index,
                    similarity = matched.similarity,
                    tier = tier.as_str(),
                    "state updated"
                );
            } else {
                action = TrackerAction::Observe;
            }
        } else {
            match tier {
                ConfidenceTier::Medium => {
                    action = TrackerAction::Observe;
                    tracing::debug!(
                        event = TrackerEvent::ObservationObserved.as_str(),
                        similarity = matched.similarity,
                        "medium confidence, observing without update"
                    );
                }
                _ => {
                    core.consecutive_low += 1;
                    tracing::debug!(
                        event = TrackerEvent::ObservationIgnored.as_str(),
                        similarity = matched.similarity,
                        consecutive_low = core.consecutive_low,
                        "low confidence, ignoring"
                    );
                    if core.consecutive_low >= self.config.max_consecutive_low {
                        tracing::warn!(
                            event = TrackerEvent::ConsecutiveLowWarning.as_str(),
                            count = core.consecutive_low,
                            "repeated low-confidence matches; upstream may be drifting"
                        );
                        core.consecutive_low = 0;
                    }
                }
            }
        }

        let consecutive_low = core.consecutive_low;
        core.metrics.push(ProcessingMetric::new(
            cleaned,
            matched.similarity,
            elapsed_ms(started),
            tier,
            action,
            Some(matched.task_id),
            Some(matched.step_index),
            consecutive_low,
        ));
        updated
    }

    /// Scan the newest same-task window entries; refuse forward jumps
    /// larger than the configured limit. Backward jumps always pass (the
    /// user may have restarted an earlier step).
    fn passes_consistency_guard(&self, core: &TrackerCore, matched: &StepMatch) -> bool {
        let Some(last) = core
            .window
            .last_for_task(&matched.task_id, self.config.guard_scan)
        else {
            return true;
        };
        let forward = matched.step_index > last.step_index;
        if forward && matched.step_index - last.step_index > self.config.max_forward_jump {
            let error = TrackError::ConsistencyRejected {
                last: last.step_index,
                proposed: matched.step_index,
            };
            tracing::warn!(
                event = TrackerEvent::ConsistencyRejected.as_str(),
                task_id = %matched.task_id,
                error = %error,
                "large forward step jump, observing instead of updating"
            );
            return false;
        }
        true
    }

    async fn record_failure(&self, input: &str, error: &TrackError, started: Instant) {
        let mut core = self.core.write().await;
        core.failure_count += 1;
        tracing::info!(
            event = TrackerEvent::ObservationFailed.as_str(),
            error = %error,
            total_failures = core.failure_count,
            "observation failed"
        );
        let consecutive_low = core.consecutive_low;
        core.metrics.push(ProcessingMetric::new(
            input,
            0.0,
            elapsed_ms(started),
            ConfidenceTier::Low,
            TrackerAction::Ignore,
            None,
            None,
            consecutive_low,
        ));
    }

    fn classify(&self, similarity: f64) -> ConfidenceTier {
        if similarity >= self.config.high_confidence_threshold {
            ConfidenceTier::High
        } else if similarity >= self.config.medium_confidence_threshold {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    /// Current state record, when any.
    pub async fn current_state(&self) -> Option<StateRecord> {
        self.core.read().await.current_state.clone()
    }

    /// Snapshot of the current state for query rendering and fallback
    /// decisions.
    pub async fn snapshot(&self) -> Option<StateSnapshot> {
        self.core
            .read()
            .await
            .current_state
            .as_ref()
            .map(StateRecord::snapshot)
    }

    /// Window memory accounting plus the failure count.
    pub async fn memory_stats(&self) -> MemoryStats {
        let core = self.core.read().await;
        let WindowStats {
            record_count,
            estimated_bytes,
            cleanup_count,
            max_size_reached,
            avg_record_bytes,
        } = core.window.stats();
        MemoryStats {
            record_count,
            estimated_bytes,
            cleanup_count,
            max_size_reached,
            avg_record_bytes,
            failure_count: core.failure_count,
        }
    }

    /// Aggregates over the retained processing metrics.
    pub async fn metrics_summary(&self) -> MetricsSummary {
        let core = self.core.read().await;
        core.metrics.summary(core.consecutive_low)
    }

    /// Newest retained processing metric.
    pub async fn latest_metric(&self) -> Option<ProcessingMetric> {
        self.core.read().await.metrics.newest().cloned()
    }

    /// Window records, oldest first.
    pub async fn window_records(&self) -> Vec<stepwise_window::WindowRecord> {
        self.core.read().await.window.records().cloned().collect()
    }

    /// Task/step/tier distributions over the window.
    pub async fn history_analysis(&self) -> HistoryAnalysis {
        let core = self.core.read().await;
        let mut analysis = HistoryAnalysis {
            total_records: core.window.len(),
            ..HistoryAnalysis::default()
        };
        let mut oldest = None;
        let mut newest = None;
        for record in core.window.records() {
            *analysis
                .task_histogram
                .entry(record.task_id.clone())
                .or_insert(0) += 1;
            *analysis
                .step_histogram
                .entry(format!("{}:{}", record.task_id, record.step_index))
                .or_insert(0) += 1;
            *analysis
                .tier_histogram
                .entry(self.classify(record.similarity).as_str().to_string())
                .or_insert(0) += 1;
            if oldest.is_none() {
                oldest = Some(record.timestamp);
            }
            newest = Some(record.timestamp);
        }
        if let (Some(first), Some(last)) = (oldest, newest) {
            analysis.time_span_minutes = (last - first).num_milliseconds() as f64 / 60_000.0;
        }
        analysis
    }

    /// Comprehensive summary for the stats endpoint.
    pub async fn state_summary(&self) -> StateSummary {
        let memory = self.memory_stats().await;
        let core = self.core.read().await;
        StateSummary {
            has_current_state: core.current_state.is_some(),
            history_len: core.history.len(),
            window_len: core.window.len(),
            high_confidence_threshold: self.config.high_confidence_threshold,
            medium_confidence_threshold: self.config.medium_confidence_threshold,
            current_state: core.current_state.clone(),
            metrics: core.metrics.summary(core.consecutive_low),
            memory,
        }
    }

    /// Store the most recently observed frame so delegated queries can
    /// attach it.
    pub async fn record_frame(&self, frame: Vec<u8>) {
        self.core.write().await.last_frame = Some(frame);
    }

    /// Most recently observed frame, when any.
    pub async fn last_frame(&self) -> Option<Vec<u8>> {
        self.core.read().await.last_frame.clone()
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
