//! JSON config file loading.
//!
//! Recognized top-level keys: `server`, `tracker`, and `vlm_fallback` (the
//! latter with the `decision_engine` / `vlm_client` / `prompts` / `logging`
//! / `performance` subsections). Unknown keys are ignored. A missing or
//! unparseable file yields full defaults with a warning; out-of-range
//! values are reported and replaced field by field.

use std::path::Path;

use serde::Deserialize;

use stepwise_fallback::FallbackConfig;
use stepwise_tracker::TrackerConfig;

/// Default gateway bind address.
pub const DEFAULT_BIND: &str = "0.0.0.0:8008";

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Gateway bind address.
    pub bind: String,
    /// Path to the task definition file, when configured.
    pub task_file: Option<String>,
    /// Tracker tunables.
    pub tracker: TrackerConfig,
    /// Fallback tunables.
    pub fallback: FallbackConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            task_file: None,
            tracker: TrackerConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file. Missing file or parse failure
    /// falls back to defaults with a warning; invalid values are replaced
    /// per field.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
            return Self::default();
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to read config file; using defaults"
                );
                return Self::default();
            }
        };
        match serde_json::from_str::<FileConfig>(&raw) {
            Ok(file) => Self::from_file(file),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse config json; using defaults"
                );
                Self::default()
            }
        }
    }

    fn from_file(file: FileConfig) -> Self {
        let fallback = file.vlm_fallback.into_fallback_config();
        for error in fallback.validation_errors() {
            tracing::warn!(%error, "config validation");
        }
        let tracker_defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            high_confidence_threshold: file
                .tracker
                .high_confidence_threshold
                .unwrap_or(tracker_defaults.high_confidence_threshold),
            medium_confidence_threshold: file
                .tracker
                .medium_confidence_threshold
                .unwrap_or(tracker_defaults.medium_confidence_threshold),
            max_window_records: file
                .tracker
                .max_window_records
                .unwrap_or(tracker_defaults.max_window_records),
            max_window_bytes: file
                .tracker
                .max_window_bytes
                .unwrap_or(tracker_defaults.max_window_bytes),
            max_metrics: file
                .tracker
                .max_metrics
                .unwrap_or(tracker_defaults.max_metrics),
            ..tracker_defaults
        };
        Self {
            bind: file.server.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            task_file: file.tracker.task_file,
            tracker,
            fallback: fallback.sanitized(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server: ServerSection,
    tracker: TrackerSection,
    vlm_fallback: VlmFallbackSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TrackerSection {
    high_confidence_threshold: Option<f64>,
    medium_confidence_threshold: Option<f64>,
    max_window_records: Option<usize>,
    max_window_bytes: Option<usize>,
    max_metrics: Option<usize>,
    task_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VlmFallbackSection {
    decision_engine: DecisionSection,
    vlm_client: VlmClientSection,
    prompts: PromptsSection,
    logging: LoggingSection,
    performance: PerformanceSection,
    enable_image_fallback: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DecisionSection {
    confidence_threshold: Option<f64>,
    enable_unknown_query_fallback: Option<bool>,
    enable_no_state_fallback: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VlmClientSection {
    model_server_url: Option<String>,
    timeout: Option<u64>,
    max_retries: Option<u32>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PromptsSection {
    fallback_template: Option<String>,
    image_fallback_template: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    enable_decision_logs: Option<bool>,
    enable_vlm_logs: Option<bool>,
    enable_performance_logs: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PerformanceSection {
    max_concurrent_requests: Option<usize>,
    request_queue_size: Option<usize>,
}

impl VlmFallbackSection {
    fn into_fallback_config(self) -> FallbackConfig {
        let defaults = FallbackConfig::default();
        FallbackConfig {
            confidence_threshold: self
                .decision_engine
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            enable_unknown_query_fallback: self
                .decision_engine
                .enable_unknown_query_fallback
                .unwrap_or(defaults.enable_unknown_query_fallback),
            enable_no_state_fallback: self
                .decision_engine
                .enable_no_state_fallback
                .unwrap_or(defaults.enable_no_state_fallback),
            vlm_url: self
                .vlm_client
                .model_server_url
                .unwrap_or(defaults.vlm_url),
            vlm_timeout_secs: self.vlm_client.timeout.unwrap_or(defaults.vlm_timeout_secs),
            max_retries: self.vlm_client.max_retries.unwrap_or(defaults.max_retries),
            max_tokens: self.vlm_client.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.vlm_client.temperature.unwrap_or(defaults.temperature),
            enable_image_fallback: self
                .enable_image_fallback
                .unwrap_or(defaults.enable_image_fallback),
            fallback_prompt_template: self
                .prompts
                .fallback_template
                .unwrap_or(defaults.fallback_prompt_template),
            image_fallback_prompt_template: self
                .prompts
                .image_fallback_template
                .unwrap_or(defaults.image_fallback_prompt_template),
            image_model_tag: defaults.image_model_tag,
            enable_decision_logs: self
                .logging
                .enable_decision_logs
                .unwrap_or(defaults.enable_decision_logs),
            enable_vlm_logs: self
                .logging
                .enable_vlm_logs
                .unwrap_or(defaults.enable_vlm_logs),
            enable_performance_logs: self
                .logging
                .enable_performance_logs
                .unwrap_or(defaults.enable_performance_logs),
            max_concurrent_requests: self
                .performance
                .max_concurrent_requests
                .unwrap_or(defaults.max_concurrent_requests),
            request_queue_size: self
                .performance
                .request_queue_size
                .unwrap_or(defaults.request_queue_size),
        }
    }
}
