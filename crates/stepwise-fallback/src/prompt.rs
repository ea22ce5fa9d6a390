//! Prompt swap protocol: save, swap, query, restore.
//!
//! The external VLM runs with a state-tracking system prompt. A delegated
//! query temporarily installs a fallback prompt; whatever happens next,
//! the saved prompt must be back in place when the delegation ends. The
//! guard returned by [`PromptSession::begin`] restores on the normal path,
//! on the error path, and (best effort, via `Drop`) on cancellation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::error::FallbackError;

/// Operations kept in the audit ring.
const MAX_OPERATIONS: usize = 50;
/// Operations examined by the health probe.
const HEALTH_SCAN: usize = 20;
/// Failures within the scan that flip health to unhealthy.
const HEALTH_FAILURE_LIMIT: usize = 5;

/// Access to the VLM's active system prompt.
#[async_trait]
pub trait PromptChannel: Send + Sync {
    /// Read the currently installed system prompt.
    async fn current_prompt(&self) -> Result<String, FallbackError>;
    /// Install a new system prompt.
    async fn set_prompt(&self, prompt: &str) -> Result<(), FallbackError>;
}

/// Prompt channel over the VLM service's `/v1/system_prompt` endpoint.
pub struct HttpPromptChannel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPromptChannel {
    /// Build a channel against the VLM base URL.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/system_prompt", self.base_url)
    }
}

#[async_trait]
impl PromptChannel for HttpPromptChannel {
    async fn current_prompt(&self) -> Result<String, FallbackError> {
        let response = self
            .client
            .get(self.endpoint())
            .send()
            .await
            .map_err(|e| FallbackError::VlmUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FallbackError::VlmUnavailable(format!(
                "prompt read returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FallbackError::VlmParse(e.to_string()))?;
        body.get("prompt")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| FallbackError::VlmParse("prompt field missing".to_string()))
    }

    async fn set_prompt(&self, prompt: &str) -> Result<(), FallbackError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| FallbackError::VlmUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FallbackError::VlmUnavailable(format!(
                "prompt write returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Where the VLM's prompt currently stands, from this side's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptState {
    /// Normal state-tracking prompt installed.
    Tracking,
    /// Fallback prompt temporarily installed.
    Fallback,
    /// A restore failed; the VLM may be stuck in fallback mode.
    Error,
    /// Nothing observed yet.
    Unknown,
}

/// One recorded prompt operation.
#[derive(Debug, Clone, Serialize)]
pub struct PromptOperation {
    /// Operation tag: save, swap, or restore.
    pub operation: &'static str,
    /// When it ran.
    pub timestamp: DateTime<Utc>,
    /// Whether it succeeded.
    pub success: bool,
    /// Error text on failure.
    pub error: Option<String>,
}

/// Session status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PromptSessionStatus {
    /// Current prompt state.
    pub state: PromptState,
    /// Total operations recorded (bounded by the ring).
    pub recorded_operations: usize,
    /// Failures among the most recent operations.
    pub recent_failures: usize,
    /// Whether the session is considered healthy.
    pub healthy: bool,
}

struct SessionInner {
    channel: Arc<dyn PromptChannel>,
    state: Mutex<PromptState>,
    operations: Mutex<VecDeque<PromptOperation>>,
}

impl SessionInner {
    fn record(&self, operation: &'static str, result: Result<(), &FallbackError>) {
        let op = PromptOperation {
            operation,
            timestamp: Utc::now(),
            success: result.is_ok(),
            error: result.err().map(ToString::to_string),
        };
        if let Ok(mut ops) = self.operations.lock() {
            ops.push_back(op);
            while ops.len() > MAX_OPERATIONS {
                let _ = ops.pop_front();
            }
        }
    }

    fn set_state(&self, state: PromptState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = state;
        }
    }

    async fn restore_saved(&self, saved: &str) -> Result<(), FallbackError> {
        match self.channel.set_prompt(saved).await {
            Ok(()) => {
                self.set_state(PromptState::Tracking);
                self.record("restore", Ok(()));
                tracing::debug!("original system prompt restored");
                Ok(())
            }
            Err(e) => {
                let error = FallbackError::PromptRestore(e.to_string());
                self.set_state(PromptState::Error);
                self.record("restore", Err(&error));
                tracing::error!(error = %error, "failed to restore system prompt");
                Err(error)
            }
        }
    }
}

/// Manages prompt save/swap/restore with an audit trail.
#[derive(Clone)]
pub struct PromptSession {
    inner: Arc<SessionInner>,
}

impl PromptSession {
    /// Build a session over a prompt channel.
    #[must_use]
    pub fn new(channel: Arc<dyn PromptChannel>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                channel,
                state: Mutex::new(PromptState::Unknown),
                operations: Mutex::new(VecDeque::with_capacity(MAX_OPERATIONS)),
            }),
        }
    }

    /// Save the current prompt and install `fallback_prompt`.
    ///
    /// On success the returned guard holds the saved prompt; the caller
    /// must consume it with [`PromptGuard::restore`]. Dropping the guard
    /// without restoring (cancellation) schedules a best-effort restore.
    ///
    /// # Errors
    /// `PromptSwitch` when the save or the swap fails. A failed swap is
    /// rolled back before returning.
    pub async fn begin(&self, fallback_prompt: &str) -> Result<PromptGuard, FallbackError> {
        let saved = match self.inner.channel.current_prompt().await {
            Ok(prompt) => {
                self.inner.set_state(PromptState::Tracking);
                self.inner.record("save", Ok(()));
                prompt
            }
            Err(e) => {
                let error = FallbackError::PromptSwitch(format!("saving current prompt: {e}"));
                self.inner.record("save", Err(&error));
                return Err(error);
            }
        };

        match self.inner.channel.set_prompt(fallback_prompt).await {
            Ok(()) => {
                self.inner.set_state(PromptState::Fallback);
                self.inner.record("swap", Ok(()));
                Ok(PromptGuard {
                    inner: Arc::clone(&self.inner),
                    saved: Some(saved),
                })
            }
            Err(e) => {
                let error = FallbackError::PromptSwitch(format!("installing fallback prompt: {e}"));
                self.inner.record("swap", Err(&error));
                // The swap may have partially applied; put the saved prompt back.
                let _ = self.inner.restore_saved(&saved).await;
                Err(error)
            }
        }
    }

    /// Session status snapshot.
    #[must_use]
    pub fn status(&self) -> PromptSessionStatus {
        let state = self
            .inner
            .state
            .lock()
            .map_or(PromptState::Unknown, |guard| *guard);
        let (recorded, recent_failures) = self.inner.operations.lock().map_or((0, 0), |ops| {
            let failures = ops
                .iter()
                .rev()
                .take(HEALTH_SCAN)
                .filter(|op| !op.success)
                .count();
            (ops.len(), failures)
        });
        let healthy = state != PromptState::Error && recent_failures < HEALTH_FAILURE_LIMIT;
        PromptSessionStatus {
            state,
            recorded_operations: recorded,
            recent_failures,
            healthy,
        }
    }

    /// Recent operations, oldest first.
    #[must_use]
    pub fn recent_operations(&self, limit: usize) -> Vec<PromptOperation> {
        self.inner.operations.lock().map_or_else(
            |_| Vec::new(),
            |ops| {
                let take = ops.len().min(limit);
                let mut out: Vec<_> = ops.iter().rev().take(take).cloned().collect();
                out.reverse();
                out
            },
        )
    }
}

/// Holds the saved prompt while the fallback prompt is installed.
pub struct PromptGuard {
    inner: Arc<SessionInner>,
    saved: Option<String>,
}

impl PromptGuard {
    /// Restore the saved prompt. Must run on every exit path.
    ///
    /// # Errors
    /// `PromptRestore` when the channel rejects the restore; the session
    /// is then flagged as being in the error state.
    pub async fn restore(mut self) -> Result<(), FallbackError> {
        match self.saved.take() {
            Some(saved) => self.inner.restore_saved(&saved).await,
            None => Ok(()),
        }
    }
}

impl Drop for PromptGuard {
    fn drop(&mut self) {
        // Reached only when the delegation future was dropped mid-flight
        // (timeout or cancellation); restore out of band.
        if let Some(saved) = self.saved.take() {
            let inner = Arc::clone(&self.inner);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = inner.restore_saved(&saved).await;
                });
            } else {
                tracing::error!("prompt restore skipped: no runtime available on cancellation");
            }
        }
    }
}
