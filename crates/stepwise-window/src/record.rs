//! Single compact entry in the observation window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accepted observation, stripped of text and step detail to bound
/// memory. Only what the consistency guard and analytics need.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct WindowRecord {
    /// When the observation was accepted.
    pub timestamp: DateTime<Utc>,
    /// Task the observation matched.
    pub task_id: String,
    /// Step within the task.
    pub step_index: u32,
    /// Similarity of the match in [0, 1].
    pub similarity: f64,
}

impl WindowRecord {
    /// Build a window record.
    pub fn new(timestamp: DateTime<Utc>, task_id: &str, step_index: u32, similarity: f64) -> Self {
        Self {
            timestamp,
            task_id: task_id.to_string(),
            step_index,
            similarity,
        }
    }

    /// Estimated in-memory size in bytes.
    ///
    /// Fixed formula so tests can assert eviction behavior exactly:
    /// timestamp 56, similarity 24, task id 2 bytes per char, step index 28,
    /// per-record overhead 50.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        56 + 24 + 2 * self.task_id.len() + 28 + 50
    }
}
