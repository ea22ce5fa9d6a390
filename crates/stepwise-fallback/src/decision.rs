//! Template-or-delegate decision engine.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use stepwise_types::{QueryIntent, StateSnapshot};

/// One decision with its reason, for logs and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the query should be delegated to the VLM.
    pub use_fallback: bool,
    /// Human-readable reason for the choice.
    pub reason: String,
}

/// Decision engine counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DecisionStats {
    /// Decisions made.
    pub total_decisions: u64,
    /// Decisions that chose delegation.
    pub fallback_decisions: u64,
    /// Decisions that chose a template answer.
    pub template_decisions: u64,
    /// Share of delegated decisions, in percent.
    pub fallback_rate_pct: f64,
    /// Threshold in effect.
    pub confidence_threshold: f64,
}

/// Decides per query whether the template answer suffices or the query
/// must be delegated.
#[derive(Debug)]
pub struct DecisionEngine {
    confidence_threshold: f64,
    unknown_query_fallback: bool,
    no_state_fallback: bool,
    log_decisions: bool,
    decision_count: AtomicU64,
    fallback_count: AtomicU64,
}

impl DecisionEngine {
    /// Build an engine from the configured policy knobs.
    #[must_use]
    pub fn new(
        confidence_threshold: f64,
        unknown_query_fallback: bool,
        no_state_fallback: bool,
        log_decisions: bool,
    ) -> Self {
        Self {
            confidence_threshold,
            unknown_query_fallback,
            no_state_fallback,
            log_decisions,
            decision_count: AtomicU64::new(0),
            fallback_count: AtomicU64::new(0),
        }
    }

    /// Decide for one query. Delegation wins when: no state exists, state
    /// confidence is below the threshold, the intent is UNKNOWN, or the
    /// state lacks a current step.
    pub fn decide(&self, query: &str, intent: QueryIntent, snapshot: Option<&StateSnapshot>) -> Decision {
        self.decision_count.fetch_add(1, Ordering::Relaxed);
        let decision = self.evaluate(intent, snapshot);
        if decision.use_fallback {
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
        }
        if self.log_decisions {
            tracing::info!(
                use_fallback = decision.use_fallback,
                reason = %decision.reason,
                query_preview = %query.chars().take(50).collect::<String>(),
                "fallback decision"
            );
        }
        decision
    }

    fn evaluate(&self, intent: QueryIntent, snapshot: Option<&StateSnapshot>) -> Decision {
        let Some(state) = snapshot else {
            if self.no_state_fallback {
                return Decision {
                    use_fallback: true,
                    reason: "no state data available".to_string(),
                };
            }
            return Decision {
                use_fallback: false,
                reason: "no state, but no-state fallback disabled".to_string(),
            };
        };
        if state.similarity < self.confidence_threshold {
            return Decision {
                use_fallback: true,
                reason: format!(
                    "confidence too low: {:.3} < {:.2}",
                    state.similarity, self.confidence_threshold
                ),
            };
        }
        if intent == QueryIntent::Unknown && self.unknown_query_fallback {
            return Decision {
                use_fallback: true,
                reason: "query type unknown".to_string(),
            };
        }
        if state.step_index.is_none() {
            return Decision {
                use_fallback: true,
                reason: "no current step available".to_string(),
            };
        }
        Decision {
            use_fallback: false,
            reason: format!(
                "template response: confidence={:.3}, type={}",
                state.similarity,
                intent.as_str()
            ),
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> DecisionStats {
        let total = self.decision_count.load(Ordering::Relaxed);
        let fallback = self.fallback_count.load(Ordering::Relaxed);
        let rate = if total == 0 {
            0.0
        } else {
            fallback as f64 / total as f64 * 100.0
        };
        DecisionStats {
            total_decisions: total,
            fallback_decisions: fallback,
            template_decisions: total - fallback,
            fallback_rate_pct: rate,
            confidence_threshold: self.confidence_threshold,
        }
    }

    /// Reset the counters.
    pub fn reset(&self) {
        self.decision_count.store(0, Ordering::Relaxed);
        self.fallback_count.store(0, Ordering::Relaxed);
    }
}
