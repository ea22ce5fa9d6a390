//! stepwise-fallback: transparent VLM delegation for state queries.
//!
//! When the tracked state cannot answer a query (no state, low confidence,
//! unknown intent), the query is delegated to the external VLM behind a
//! save → swap → query → restore prompt protocol, optionally with the most
//! recent observed frame attached. Delegated answers come back in the same
//! unified shape as template answers.

mod config;
mod decision;
mod error;
mod image;
mod processor;
mod prompt;
mod vlm;

pub use config::{DEFAULT_FALLBACK_PROMPT, DEFAULT_IMAGE_FALLBACK_PROMPT, FallbackConfig};
pub use decision::{Decision, DecisionEngine, DecisionStats};
pub use error::FallbackError;
pub use image::{
    CameraSource, CapturedImage, ImageCapture, ImagePreprocessor, PassthroughPreprocessor,
};
pub use processor::{
    FallbackProcessor, ProcessorHealth, ProcessorStats, apparent_confidence, apparent_query_type,
};
pub use prompt::{
    HttpPromptChannel, PromptChannel, PromptGuard, PromptOperation, PromptSession,
    PromptSessionStatus, PromptState,
};
pub use vlm::{
    ChatContent, ChatTransport, HttpChatTransport, TransportReply, VlmClient, VlmHealth, VlmStats,
};
