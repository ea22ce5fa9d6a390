//! Query orchestration: template answer or transparent VLM delegation.
//!
//! Every path out of this module produces the same unified response shape;
//! callers cannot tell which path answered them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use stepwise_query::classify;
use stepwise_tracker::StateTracker;
use stepwise_types::{QueryIntent, StateSnapshot, UnifiedResponse};

use crate::config::FallbackConfig;
use crate::decision::{DecisionEngine, DecisionStats};
use crate::error::FallbackError;
use crate::image::{CameraSource, ImageCapture, ImagePreprocessor, PassthroughPreprocessor};
use crate::prompt::{HttpPromptChannel, PromptChannel, PromptSession, PromptSessionStatus};
use crate::vlm::{ChatContent, ChatTransport, HttpChatTransport, VlmClient, VlmHealth, VlmStats};

/// Confidence shown when the real state confidence is below the threshold
/// (or no state exists). Keeps delegated answers indistinguishable from
/// template answers.
const APPARENT_CONFIDENCE_FLOOR: f64 = 0.72;
/// Template confidence when no state exists but delegation is disabled.
const NO_STATE_TEMPLATE_CONFIDENCE: f64 = 0.8;

const BUSY_ANSWER: &str =
    "I'm handling a lot of requests right now. Please try again in a moment.";
const SERVICE_TROUBLE_ANSWER: &str =
    "I'm having trouble accessing the AI service right now. Please try again in a moment.";
const REPHRASE_ANSWER: &str =
    "I'm having trouble processing your request right now. Please try again with a different \
     question.";
const TEMPORARY_ISSUE_ANSWER: &str =
    "I'm experiencing a temporary issue. Please try again or contact support if the problem \
     persists.";

/// Orchestrator counters plus component stats.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    /// Queries handled.
    pub total_queries: u64,
    /// Queries answered by templates.
    pub template_queries: u64,
    /// Queries answered by delegation.
    pub fallback_queries: u64,
    /// Queries that ended in an error answer.
    pub error_queries: u64,
    /// Share of delegated queries, in percent.
    pub fallback_rate_pct: f64,
    /// Share of error answers, in percent.
    pub error_rate_pct: f64,
    /// Decision engine counters.
    pub decision: DecisionStats,
    /// VLM client counters.
    pub vlm: VlmStats,
    /// Prompt session status.
    pub prompt: PromptSessionStatus,
}

/// Aggregated health probe result.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorHealth {
    /// VLM reachable and prompt session sane.
    pub healthy: bool,
    /// VLM probe detail.
    pub vlm: VlmHealth,
    /// Prompt session detail.
    pub prompt: PromptSessionStatus,
    /// Probe time.
    pub timestamp: chrono::DateTime<Utc>,
}

/// Routes queries between template answers and transparent VLM delegation.
pub struct FallbackProcessor {
    config: FallbackConfig,
    tracker: StateTracker,
    decision: DecisionEngine,
    prompt_session: PromptSession,
    vlm: VlmClient,
    images: ImageCapture,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    total_queries: AtomicU64,
    template_queries: AtomicU64,
    fallback_queries: AtomicU64,
    error_queries: AtomicU64,
}

impl FallbackProcessor {
    /// Build a processor with HTTP seams against the configured VLM URL.
    #[must_use]
    pub fn new(config: FallbackConfig, tracker: StateTracker) -> Self {
        let channel: Arc<dyn PromptChannel> = Arc::new(HttpPromptChannel::new(&config.vlm_url));
        let transport: Arc<dyn ChatTransport> = Arc::new(HttpChatTransport::new());
        Self::with_seams(
            config,
            tracker,
            channel,
            transport,
            None,
            Arc::new(PassthroughPreprocessor),
        )
    }

    /// Build a processor with explicit seams (tests, custom deployments).
    #[must_use]
    pub fn with_seams(
        config: FallbackConfig,
        tracker: StateTracker,
        channel: Arc<dyn PromptChannel>,
        transport: Arc<dyn ChatTransport>,
        camera: Option<Arc<dyn CameraSource>>,
        preprocessor: Arc<dyn ImagePreprocessor>,
    ) -> Self {
        let config = config.sanitized();
        let decision = DecisionEngine::new(
            config.confidence_threshold,
            config.enable_unknown_query_fallback,
            config.enable_no_state_fallback,
            config.enable_decision_logs,
        );
        let vlm = VlmClient::new(
            transport,
            &config.vlm_url,
            config.vlm_timeout_secs,
            config.max_retries,
            config.enable_vlm_logs,
        );
        let images = ImageCapture::new(
            camera,
            Some(tracker.clone()),
            preprocessor,
            &config.image_model_tag,
        );
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));
        Self {
            prompt_session: PromptSession::new(channel),
            decision,
            vlm,
            images,
            semaphore,
            queued: Arc::new(AtomicUsize::new(0)),
            total_queries: AtomicU64::new(0),
            template_queries: AtomicU64::new(0),
            fallback_queries: AtomicU64::new(0),
            error_queries: AtomicU64::new(0),
            config,
            tracker,
        }
    }

    /// Answer one user query. Always returns the unified shape.
    pub async fn process_query(&self, query: &str) -> UnifiedResponse {
        let started = Instant::now();
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.tracker.snapshot().await;
        let intent = classify(query);
        let decision = self.decision.decide(query, intent, snapshot.as_ref());

        let response = if decision.use_fallback {
            match self.execute_fallback(query, snapshot.as_ref()).await {
                Ok(text) => {
                    self.fallback_queries.fetch_add(1, Ordering::Relaxed);
                    UnifiedResponse::new(
                        text,
                        apparent_query_type(query).as_str(),
                        apparent_confidence(snapshot.as_ref()),
                        elapsed_ms(started),
                    )
                }
                Err(e) => {
                    self.error_queries.fetch_add(1, Ordering::Relaxed);
                    let (text, confidence) = friendly_error(&e);
                    UnifiedResponse::new(
                        text,
                        apparent_query_type(query).as_str(),
                        confidence,
                        elapsed_ms(started),
                    )
                }
            }
        } else {
            self.template_queries.fetch_add(1, Ordering::Relaxed);
            let result = stepwise_query::process_query(query, snapshot.as_ref());
            let confidence = snapshot
                .as_ref()
                .map_or(NO_STATE_TEMPLATE_CONFIDENCE, |s| s.similarity);
            UnifiedResponse::new(
                result.response_text,
                result.query_type.as_str(),
                confidence,
                elapsed_ms(started),
            )
        };

        if self.config.enable_performance_logs {
            tracing::debug!(
                latency_ms = response.processing_time_ms,
                query_type = %response.query_type,
                "query processed"
            );
        }
        response
    }

    async fn execute_fallback(
        &self,
        query: &str,
        _snapshot: Option<&StateSnapshot>,
    ) -> Result<String, FallbackError> {
        let _permit = self.acquire_slot().await?;

        let (content, prompt) = if self.config.enable_image_fallback {
            match self.images.current_image().await {
                Some(image) => {
                    let prompt = self
                        .config
                        .image_fallback_prompt_template
                        .replace("{query}", query)
                        .replace("{image_format}", &image.format)
                        .replace("{image_size}", &image.size.to_string());
                    (
                        ChatContent::TextWithImage {
                            text: query.to_string(),
                            image,
                        },
                        prompt,
                    )
                }
                None => self.text_only(query),
            }
        } else {
            self.text_only(query)
        };

        let guard = self.prompt_session.begin(&prompt).await?;
        let answer = self
            .vlm
            .send_query(content, self.config.max_tokens, self.config.temperature)
            .await;
        let restored = guard.restore().await;

        match (answer, restored) {
            (Ok(text), Ok(())) => Ok(text),
            // The answer arrived but the VLM is stuck in fallback mode;
            // that outweighs the answer.
            (Ok(_), Err(restore_err)) => Err(restore_err),
            (Err(e), _) => Err(e),
        }
    }

    fn text_only(&self, query: &str) -> (ChatContent, String) {
        let prompt = self
            .config
            .fallback_prompt_template
            .replace("{query}", query);
        (ChatContent::Text(query.to_string()), prompt)
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, FallbackError> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(permit);
        }
        let _queued = QueuedGuard::enter(&self.queued, self.config.request_queue_size)?;
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| FallbackError::QueueFull)
    }

    /// Aggregated health probe.
    pub async fn health(&self) -> ProcessorHealth {
        let vlm = self.vlm.health().await;
        let prompt = self.prompt_session.status();
        ProcessorHealth {
            healthy: vlm.healthy && prompt.healthy,
            vlm,
            prompt,
            timestamp: Utc::now(),
        }
    }

    /// Counter snapshot across the orchestrator and its components.
    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        let total = self.total_queries.load(Ordering::Relaxed);
        let fallback = self.fallback_queries.load(Ordering::Relaxed);
        let errors = self.error_queries.load(Ordering::Relaxed);
        let pct = |part: u64| {
            if total == 0 {
                0.0
            } else {
                part as f64 / total as f64 * 100.0
            }
        };
        ProcessorStats {
            total_queries: total,
            template_queries: self.template_queries.load(Ordering::Relaxed),
            fallback_queries: fallback,
            error_queries: errors,
            fallback_rate_pct: pct(fallback),
            error_rate_pct: pct(errors),
            decision: self.decision.stats(),
            vlm: self.vlm.stats(),
            prompt: self.prompt_session.status(),
        }
    }

    /// Reset orchestrator, decision, and VLM counters.
    pub fn reset_stats(&self) {
        self.total_queries.store(0, Ordering::Relaxed);
        self.template_queries.store(0, Ordering::Relaxed);
        self.fallback_queries.store(0, Ordering::Relaxed);
        self.error_queries.store(0, Ordering::Relaxed);
        self.decision.reset();
        self.vlm.reset();
    }
}

/// RAII queue-slot accounting for waiters behind the concurrency cap.
struct QueuedGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize, queue_size: usize) -> Result<Self, FallbackError> {
        let waiting = counter.fetch_add(1, Ordering::SeqCst);
        if waiting >= queue_size {
            counter.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(waiting, queue_size, "fallback queue full; rejecting query");
            return Err(FallbackError::QueueFull);
        }
        Ok(Self { counter })
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Query type shown to the caller for delegated answers. Derived from the
/// query alone and never `Unknown`, so the answer looks like a template
/// response.
#[must_use]
pub fn apparent_query_type(query: &str) -> QueryIntent {
    let lowered = query.to_lowercase();
    let contains_any = |words: &[&str]| words.iter().any(|w| lowered.contains(w));
    if contains_any(&["step", "where", "current", "am i"]) {
        QueryIntent::CurrentStep
    } else if contains_any(&["next", "then"]) {
        QueryIntent::NextStep
    } else if contains_any(&["tools", "need", "equipment", "require"]) {
        QueryIntent::RequiredTools
    } else if contains_any(&["progress", "done", "complete", "finish"]) {
        QueryIntent::CompletionStatus
    } else if contains_any(&["overall", "summary", "overview"]) {
        QueryIntent::ProgressOverview
    } else {
        QueryIntent::Help
    }
}

/// Confidence shown to the caller for delegated answers: the state's own
/// value when it is presentable, otherwise the fixed floor.
#[must_use]
pub fn apparent_confidence(snapshot: Option<&StateSnapshot>) -> f64 {
    match snapshot {
        Some(state) if state.similarity >= 0.40 => state.similarity,
        _ => APPARENT_CONFIDENCE_FLOOR,
    }
}

fn friendly_error(error: &FallbackError) -> (&'static str, f64) {
    match error {
        FallbackError::QueueFull => (BUSY_ANSWER, 0.5),
        FallbackError::VlmUnavailable(_)
        | FallbackError::VlmTimeout(_)
        | FallbackError::VlmParse(_) => (SERVICE_TROUBLE_ANSWER, 0.6),
        FallbackError::PromptSwitch(_) => (REPHRASE_ANSWER, 0.6),
        FallbackError::PromptRestore(_) => (TEMPORARY_ISSUE_ANSWER, 0.5),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(similarity: f64) -> StateSnapshot {
        StateSnapshot {
            timestamp: Utc::now(),
            task_id: "coffee".to_string(),
            step_index: Some(1),
            similarity,
            matched_step: None,
            observed_text: None,
        }
    }

    #[test]
    fn apparent_type_never_reveals_unknown() {
        assert_eq!(
            apparent_query_type("What is the meaning of life?"),
            QueryIntent::Help
        );
        assert_eq!(apparent_query_type("where am i"), QueryIntent::CurrentStep);
        assert_eq!(apparent_query_type("and then?"), QueryIntent::NextStep);
        assert_eq!(
            apparent_query_type("is it finished"),
            QueryIntent::CompletionStatus
        );
    }

    #[test]
    fn apparent_confidence_floors_low_and_missing_state() {
        assert!((apparent_confidence(None) - 0.72).abs() < f64::EPSILON);
        let low = snapshot(0.2);
        assert!((apparent_confidence(Some(&low)) - 0.72).abs() < f64::EPSILON);
        let fine = snapshot(0.81);
        assert!((apparent_confidence(Some(&fine)) - 0.81).abs() < f64::EPSILON);
    }
}
