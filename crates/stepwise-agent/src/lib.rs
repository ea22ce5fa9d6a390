//! stepwise-agent: service wiring for the step tracker.
//!
//! Loads the JSON config, builds the tracker and the fallback processor,
//! and serves the HTTP gateway (`/ingest`, `/query`, `/health`, `/stats`,
//! `/state`).

mod config;
mod gateway;

pub use config::{AppConfig, DEFAULT_BIND};
pub use gateway::{
    GatewayState, IngestRequest, IngestResponse, QueryRequest, router, run_http,
};
