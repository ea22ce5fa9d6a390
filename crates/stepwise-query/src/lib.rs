//! stepwise-query: instant template answers about the tracked state.
//!
//! Classifies a user query into a fixed intent set with an ordered regex
//! table, then renders a deterministic answer from the current state
//! snapshot. Classification and rendering are pure; only the latency field
//! of the result varies between calls.

mod classify;
mod render;

use std::time::Instant;

use stepwise_types::{QueryIntent, QueryResult, StateSnapshot};

pub use classify::classify;
pub use render::render;

/// Confidence attached to answers for classified intents.
const CLASSIFIED_CONFIDENCE: f64 = 0.9;
/// Confidence attached to answers for unclassified queries.
const UNKNOWN_CONFIDENCE: f64 = 0.3;

/// Classify `query` and render an answer from `snapshot`.
#[must_use]
pub fn process_query(query: &str, snapshot: Option<&StateSnapshot>) -> QueryResult {
    let started = Instant::now();
    let query_type = classify(query);
    let response_text = render(query_type, snapshot);
    let confidence = if query_type == QueryIntent::Unknown {
        UNKNOWN_CONFIDENCE
    } else {
        CLASSIFIED_CONFIDENCE
    };
    QueryResult {
        query_type,
        response_text,
        confidence,
        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        raw_query: query.to_string(),
    }
}

/// Example phrasings the classifier understands, for discovery surfaces.
#[must_use]
pub fn example_queries() -> Vec<&'static str> {
    vec![
        "Where am I?",
        "What is the current step?",
        "What's next?",
        "What tools do I need?",
        "What equipment is required?",
        "What's my progress?",
        "How much is done?",
        "Give me an overview",
        "Help me with this step",
        "How do I do this step?",
    ]
}
