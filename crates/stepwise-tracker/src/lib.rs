//! stepwise-tracker: observation ingest loop for procedural-task tracking.
//!
//! Observation text from an upstream vision model flows through the
//! normalizer, is matched against the knowledge base, and drives a
//! confidence-tiered state update with a bounded observation window,
//! a step-jump consistency guard, and per-observation metrics.

mod kb;
mod metrics;
mod normalize;
mod tracker;

pub use kb::{StaticStepIndex, StepDefinition, StepKnowledge, StepMatch, TaskDefinition};
pub use metrics::{MetricsLog, MetricsSummary, ProcessingMetric};
pub use normalize::normalize;
pub use tracker::{
    HistoryAnalysis, MemoryStats, StateSummary, StateTracker, TrackerConfig, TrackerEvent,
};
