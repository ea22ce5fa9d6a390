//! stepwise-types - Common type definitions for the stepwise workspace.
//!
//! Shared data structures used across the tracker, query, fallback, and
//! gateway crates. All types serialize with serde so they can cross the
//! HTTP boundary unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an observation failed to produce a state update.
///
/// These never cross the ingest boundary; they are recorded as metrics and
/// collapsed into `updated = false`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum TrackError {
    /// Observation text was rejected by the normalizer.
    #[error("input rejected: {0}")]
    InputRejected(String),

    /// Knowledge base produced no match for the cleaned text.
    #[error("no knowledge base match")]
    NoMatch,

    /// Update refused by the step-jump consistency guard.
    #[error("consistency rejected: step {last} -> {proposed}")]
    ConsistencyRejected {
        /// Step index of the most recent same-task window entry.
        last: u32,
        /// Step index the rejected observation proposed.
        proposed: u32,
    },
}

/// Detail for one knowledge-base step. Read-only from the core's view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchedStep {
    /// Short step title.
    pub step_title: String,
    /// Longer description of what the step involves.
    pub step_description: String,
    /// Tools the step requires.
    #[serde(default)]
    pub tools_needed: Vec<String>,
    /// Signals that the step is finished.
    #[serde(default)]
    pub completion_indicators: Vec<String>,
    /// Visual cues a vision model would report for this step.
    #[serde(default)]
    pub visual_cues: Vec<String>,
    /// Rough duration estimate, free-form (e.g. "2 minutes").
    #[serde(default)]
    pub estimated_duration: String,
    /// Safety notes for the step.
    #[serde(default)]
    pub safety_notes: Vec<String>,
}

/// Confidence band a similarity score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    /// Similarity at or above the high threshold.
    High,
    /// Similarity between the medium and high thresholds.
    Medium,
    /// Similarity below the medium threshold.
    Low,
}

impl ConfidenceTier {
    /// Stable uppercase tag for logs and histograms.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

/// Action the tracker took for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerAction {
    /// State was replaced with the new record.
    Update,
    /// Observation noted but state left unchanged.
    Observe,
    /// Observation discarded.
    Ignore,
}

impl TrackerAction {
    /// Stable uppercase tag for logs and histograms.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "UPDATE",
            Self::Observe => "OBSERVE",
            Self::Ignore => "IGNORE",
        }
    }
}

/// Authoritative record of the most recent accepted observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// When the observation was accepted.
    pub timestamp: DateTime<Utc>,
    /// Normalized observation text.
    pub cleaned_text: String,
    /// Task the observation matched.
    pub task_id: String,
    /// Step within the task.
    pub step_index: u32,
    /// Knowledge-base similarity in [0, 1].
    pub similarity: f64,
    /// Step detail returned by the knowledge base.
    pub matched_step: MatchedStep,
}

impl StateRecord {
    /// Project this record into the snapshot form consumed by the query
    /// and fallback layers.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            timestamp: self.timestamp,
            task_id: self.task_id.clone(),
            step_index: Some(self.step_index),
            similarity: self.similarity,
            matched_step: Some(self.matched_step.clone()),
            observed_text: Some(self.cleaned_text.clone()),
        }
    }
}

/// Read-only view of the current state handed to query rendering and the
/// fallback decision engine. `step_index` and `matched_step` may be absent
/// when the snapshot was assembled from partial data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// When the underlying record was accepted.
    pub timestamp: DateTime<Utc>,
    /// Task identifier.
    pub task_id: String,
    /// Current step, when known.
    pub step_index: Option<u32>,
    /// Similarity (confidence) of the underlying match in [0, 1].
    pub similarity: f64,
    /// Step detail, when the knowledge base provided one.
    pub matched_step: Option<MatchedStep>,
    /// Normalized observation text the state was built from.
    pub observed_text: Option<String>,
}

/// Fixed set of intents a user query is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryIntent {
    /// "Where am I" style questions.
    CurrentStep,
    /// Questions about the upcoming step.
    NextStep,
    /// Questions about tools or equipment.
    RequiredTools,
    /// Progress / completion questions.
    CompletionStatus,
    /// Overview / big-picture questions.
    ProgressOverview,
    /// How-to and guidance questions.
    Help,
    /// No pattern matched.
    Unknown,
}

impl QueryIntent {
    /// Stable uppercase tag matching the wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CurrentStep => "CURRENT_STEP",
            Self::NextStep => "NEXT_STEP",
            Self::RequiredTools => "REQUIRED_TOOLS",
            Self::CompletionStatus => "COMPLETION_STATUS",
            Self::ProgressOverview => "PROGRESS_OVERVIEW",
            Self::Help => "HELP",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Result of template query processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Classified intent.
    pub query_type: QueryIntent,
    /// Rendered answer.
    pub response_text: String,
    /// Confidence attached to the answer, in [0, 1].
    pub confidence: f64,
    /// Time spent producing the answer.
    pub latency_ms: f64,
    /// Original query text.
    pub raw_query: String,
}

/// The one response shape every query path produces.
///
/// Callers cannot tell from this shape whether a template or a delegated
/// model produced the answer; no source tag is ever added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResponse {
    /// Always "success"; errors are folded into `response_text`.
    pub status: String,
    /// Answer text.
    pub response_text: String,
    /// Apparent query type (uppercase tag, never "UNKNOWN" for delegated
    /// answers).
    pub query_type: String,
    /// Apparent confidence in [0, 1].
    pub confidence: f64,
    /// End-to-end processing time.
    pub processing_time_ms: f64,
}

impl UnifiedResponse {
    /// Build a success-shaped response.
    #[must_use]
    pub fn new(
        response_text: impl Into<String>,
        query_type: &str,
        confidence: f64,
        processing_time_ms: f64,
    ) -> Self {
        Self {
            status: "success".to_string(),
            response_text: response_text.into(),
            query_type: query_type.to_string(),
            confidence,
            processing_time_ms,
        }
    }
}
