//! Per-observation processing metrics, bounded to the most recent entries.

use std::collections::HashMap;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stepwise_types::{ConfidenceTier, TrackerAction};

/// Default number of metrics retained.
pub const DEFAULT_MAX_METRICS: usize = 100;

/// Preview length for recorded input text.
const PREVIEW_CHARS: usize = 100;

/// One processed observation, quantified.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingMetric {
    /// When the observation was processed.
    pub timestamp: DateTime<Utc>,
    /// First 100 characters of the input.
    pub input_preview: String,
    /// Similarity of the knowledge-base match, 0 on failure.
    pub similarity: f64,
    /// Ingest latency.
    pub latency_ms: f64,
    /// Confidence tier the similarity fell into.
    pub tier: ConfidenceTier,
    /// Action taken.
    pub action: TrackerAction,
    /// Matched task, when any.
    pub task_id: Option<String>,
    /// Matched step, when any.
    pub step_index: Option<u32>,
    /// Consecutive-low counter at record time.
    pub consecutive_low_count: u32,
}

impl ProcessingMetric {
    /// Build a metric, truncating the input to the preview length.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: &str,
        similarity: f64,
        latency_ms: f64,
        tier: ConfidenceTier,
        action: TrackerAction,
        task_id: Option<String>,
        step_index: Option<u32>,
        consecutive_low_count: u32,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            input_preview: input.chars().take(PREVIEW_CHARS).collect(),
            similarity,
            latency_ms,
            tier,
            action,
            task_id,
            step_index,
            consecutive_low_count,
        }
    }
}

/// Aggregates over the retained metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    /// Metrics currently retained.
    pub total: usize,
    /// Mean similarity over retained metrics.
    pub avg_similarity: f64,
    /// Lowest retained similarity.
    pub min_similarity: f64,
    /// Highest retained similarity.
    pub max_similarity: f64,
    /// Mean ingest latency.
    pub avg_latency_ms: f64,
    /// Lowest retained latency.
    pub min_latency_ms: f64,
    /// Highest retained latency.
    pub max_latency_ms: f64,
    /// Count per action tag.
    pub action_histogram: HashMap<String, u64>,
    /// Count per tier tag.
    pub tier_histogram: HashMap<String, u64>,
    /// Current consecutive-low counter.
    pub consecutive_low_count: u32,
}

/// Append-only metric log bounded to the newest `max` entries.
#[derive(Debug)]
pub struct MetricsLog {
    ring: VecDeque<ProcessingMetric>,
    max: usize,
}

impl Default for MetricsLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_METRICS)
    }
}

impl MetricsLog {
    /// Create a log retaining the newest `max` entries.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(max.min(1024)),
            max: max.max(1),
        }
    }

    /// Append a metric, evicting the oldest when over capacity.
    pub fn push(&mut self, metric: ProcessingMetric) {
        self.ring.push_back(metric);
        while self.ring.len() > self.max {
            let _ = self.ring.pop_front();
        }
    }

    /// Retained metrics, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessingMetric> {
        self.ring.iter()
    }

    /// Number of retained metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// True when no metrics are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Newest retained metric.
    #[must_use]
    pub fn newest(&self) -> Option<&ProcessingMetric> {
        self.ring.back()
    }

    /// Aggregate the retained metrics. `consecutive_low_count` is supplied
    /// by the tracker, which owns the live counter.
    #[must_use]
    pub fn summary(&self, consecutive_low_count: u32) -> MetricsSummary {
        if self.ring.is_empty() {
            return MetricsSummary {
                consecutive_low_count,
                ..MetricsSummary::default()
            };
        }
        let total = self.ring.len();
        let mut action_histogram: HashMap<String, u64> = HashMap::new();
        let mut tier_histogram: HashMap<String, u64> = HashMap::new();
        let mut sim_sum = 0.0;
        let mut sim_min = f64::MAX;
        let mut sim_max = f64::MIN;
        let mut lat_sum = 0.0;
        let mut lat_min = f64::MAX;
        let mut lat_max = f64::MIN;
        for metric in &self.ring {
            sim_sum += metric.similarity;
            sim_min = sim_min.min(metric.similarity);
            sim_max = sim_max.max(metric.similarity);
            lat_sum += metric.latency_ms;
            lat_min = lat_min.min(metric.latency_ms);
            lat_max = lat_max.max(metric.latency_ms);
            *action_histogram
                .entry(metric.action.as_str().to_string())
                .or_insert(0) += 1;
            *tier_histogram
                .entry(metric.tier.as_str().to_string())
                .or_insert(0) += 1;
        }
        MetricsSummary {
            total,
            avg_similarity: sim_sum / total as f64,
            min_similarity: sim_min,
            max_similarity: sim_max,
            avg_latency_ms: lat_sum / total as f64,
            min_latency_ms: lat_min,
            max_latency_ms: lat_max,
            action_histogram,
            tier_histogram,
            consecutive_low_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(similarity: f64, action: TrackerAction, tier: ConfidenceTier) -> ProcessingMetric {
        ProcessingMetric::new(
            "observation text",
            similarity,
            1.5,
            tier,
            action,
            Some("coffee".to_string()),
            Some(1),
            0,
        )
    }

    #[test]
    fn ring_is_bounded() {
        let mut log = MetricsLog::new(3);
        for i in 0..5 {
            log.push(metric(
                f64::from(i) / 10.0,
                TrackerAction::Ignore,
                ConfidenceTier::Low,
            ));
        }
        assert_eq!(log.len(), 3);
        let first = log.iter().next().unwrap();
        assert!((first.similarity - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn preview_is_truncated_to_100_chars() {
        let long = "x".repeat(250);
        let m = ProcessingMetric::new(
            &long,
            0.5,
            1.0,
            ConfidenceTier::Medium,
            TrackerAction::Observe,
            None,
            None,
            0,
        );
        assert_eq!(m.input_preview.chars().count(), 100);
    }

    #[test]
    fn summary_aggregates_histograms_and_ranges() {
        let mut log = MetricsLog::new(10);
        log.push(metric(0.9, TrackerAction::Update, ConfidenceTier::High));
        log.push(metric(0.5, TrackerAction::Observe, ConfidenceTier::Medium));
        log.push(metric(0.1, TrackerAction::Ignore, ConfidenceTier::Low));
        let summary = log.summary(2);
        assert_eq!(summary.total, 3);
        assert!((summary.avg_similarity - 0.5).abs() < 1e-9);
        assert!((summary.min_similarity - 0.1).abs() < f64::EPSILON);
        assert!((summary.max_similarity - 0.9).abs() < f64::EPSILON);
        assert_eq!(summary.action_histogram["UPDATE"], 1);
        assert_eq!(summary.tier_histogram["LOW"], 1);
        assert_eq!(summary.consecutive_low_count, 2);
    }

    #[test]
    fn empty_summary_is_all_zero() {
        let log = MetricsLog::new(10);
        let summary = log.summary(0);
        assert_eq!(summary.total, 0);
        assert!(summary.action_histogram.is_empty());
    }
}
