//! Fallback-side error kinds.
//!
//! None of these ever cross the query boundary as errors; the processor
//! maps each kind to a neutral user-visible message in the unified shape.

use thiserror::Error;

/// Errors raised inside the fallback orchestrator.
#[derive(Debug, Error)]
pub enum FallbackError {
    /// Transport failure or non-2xx from the VLM service, after retries.
    #[error("VLM service unavailable: {0}")]
    VlmUnavailable(String),

    /// VLM request exceeded the configured timeout, after retries.
    #[error("VLM request timed out after {0}s")]
    VlmTimeout(u64),

    /// VLM answered with a body the client could not interpret.
    #[error("VLM response parse error: {0}")]
    VlmParse(String),

    /// Saving or installing a prompt failed.
    #[error("prompt switch failed: {0}")]
    PromptSwitch(String),

    /// Restoring the saved prompt failed; the VLM may be left in fallback
    /// mode. Critical.
    #[error("prompt restore failed: {0}")]
    PromptRestore(String),

    /// The fallback queue is full.
    #[error("fallback queue full")]
    QueueFull,
}
