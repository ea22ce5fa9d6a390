//! Fallback tunables with per-field validation.
//!
//! Invalid fields never abort startup: each one is reported and replaced
//! with its default, so a partially broken config file degrades gracefully.

use serde::Deserialize;

/// Default prompt installed for text-only delegated queries.
pub const DEFAULT_FALLBACK_PROMPT: &str = "\
You are a helpful AI assistant. Please answer the user's question directly and helpfully.

User Question: {query}

Please provide a clear, accurate, and helpful response. Focus on:
- Being informative and accurate
- Providing practical guidance when appropriate
- Being concise but complete
- Using a friendly and supportive tone

Answer:";

/// Default prompt installed for delegated queries that carry an image.
pub const DEFAULT_IMAGE_FALLBACK_PROMPT: &str = "\
You are a helpful AI assistant with visual capabilities. Please analyze the provided image \
and answer the user's question.

User Question: {query}

Image Format: {image_format}
Image Size: {image_size} bytes

Please provide a clear, accurate, and helpful response based on both the image content and \
the user's question. Focus on:
- Visual analysis of the image
- Answering the specific question
- Providing practical guidance when appropriate
- Being concise but complete
- Using a friendly and supportive tone

Answer:";

/// All fallback tunables. Field-for-field deserializable so the gateway
/// config file can overlay any subset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Below this state confidence, queries are delegated.
    pub confidence_threshold: f64,
    /// Delegate when the query classifies as UNKNOWN.
    pub enable_unknown_query_fallback: bool,
    /// Delegate when no state exists.
    pub enable_no_state_fallback: bool,
    /// Base URL of the VLM service.
    pub vlm_url: String,
    /// Per-request VLM timeout in seconds.
    pub vlm_timeout_secs: u64,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Token budget for delegated answers.
    pub max_tokens: u32,
    /// Sampling temperature for delegated answers.
    pub temperature: f64,
    /// Attach a current frame to delegated queries when one is available.
    pub enable_image_fallback: bool,
    /// Prompt template for text-only delegation; must contain `{query}`.
    pub fallback_prompt_template: String,
    /// Prompt template for image delegation; must contain `{query}`,
    /// `{image_format}`, and `{image_size}`.
    pub image_fallback_prompt_template: String,
    /// Model tag handed to the image preprocessor.
    pub image_model_tag: String,
    /// Log every fallback decision.
    pub enable_decision_logs: bool,
    /// Log VLM request/retry activity.
    pub enable_vlm_logs: bool,
    /// Log per-query latency.
    pub enable_performance_logs: bool,
    /// In-flight delegated VLM calls allowed at once.
    pub max_concurrent_requests: usize,
    /// Queries allowed to wait for a slot before being rejected.
    pub request_queue_size: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.40,
            enable_unknown_query_fallback: true,
            enable_no_state_fallback: true,
            vlm_url: "http://localhost:8080".to_string(),
            vlm_timeout_secs: 30,
            max_retries: 2,
            max_tokens: 500,
            temperature: 0.7,
            enable_image_fallback: true,
            fallback_prompt_template: DEFAULT_FALLBACK_PROMPT.to_string(),
            image_fallback_prompt_template: DEFAULT_IMAGE_FALLBACK_PROMPT.to_string(),
            image_model_tag: "smolvlm".to_string(),
            enable_decision_logs: true,
            enable_vlm_logs: true,
            enable_performance_logs: true,
            max_concurrent_requests: 10,
            request_queue_size: 100,
        }
    }
}

impl FallbackConfig {
    /// Validation messages for every field that is out of range.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            errors.push(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.vlm_timeout_secs == 0 {
            errors.push("vlm_timeout_secs must be positive".to_string());
        }
        if self.max_tokens == 0 {
            errors.push("max_tokens must be positive".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            errors.push(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            ));
        }
        if !self.vlm_url.starts_with("http://") && !self.vlm_url.starts_with("https://") {
            errors.push(format!("vlm_url must be an HTTP URL, got {}", self.vlm_url));
        }
        if !self.fallback_prompt_template.contains("{query}") {
            errors.push("fallback_prompt_template must contain {query}".to_string());
        }
        for placeholder in ["{query}", "{image_format}", "{image_size}"] {
            if !self.image_fallback_prompt_template.contains(placeholder) {
                errors.push(format!(
                    "image_fallback_prompt_template must contain {placeholder}"
                ));
            }
        }
        if self.max_concurrent_requests == 0 {
            errors.push("max_concurrent_requests must be positive".to_string());
        }
        if self.request_queue_size == 0 {
            errors.push("request_queue_size must be positive".to_string());
        }
        errors
    }

    /// Replace every invalid field with its default, warning per field.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            warn_substituted("confidence_threshold");
            self.confidence_threshold = defaults.confidence_threshold;
        }
        if self.vlm_timeout_secs == 0 {
            warn_substituted("vlm_timeout_secs");
            self.vlm_timeout_secs = defaults.vlm_timeout_secs;
        }
        if self.max_tokens == 0 {
            warn_substituted("max_tokens");
            self.max_tokens = defaults.max_tokens;
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            warn_substituted("temperature");
            self.temperature = defaults.temperature;
        }
        if !self.vlm_url.starts_with("http://") && !self.vlm_url.starts_with("https://") {
            warn_substituted("vlm_url");
            self.vlm_url = defaults.vlm_url;
        }
        if !self.fallback_prompt_template.contains("{query}") {
            warn_substituted("fallback_prompt_template");
            self.fallback_prompt_template = defaults.fallback_prompt_template;
        }
        if ["{query}", "{image_format}", "{image_size}"]
            .iter()
            .any(|p| !self.image_fallback_prompt_template.contains(p))
        {
            warn_substituted("image_fallback_prompt_template");
            self.image_fallback_prompt_template = defaults.image_fallback_prompt_template;
        }
        if self.max_concurrent_requests == 0 {
            warn_substituted("max_concurrent_requests");
            self.max_concurrent_requests = defaults.max_concurrent_requests;
        }
        if self.request_queue_size == 0 {
            warn_substituted("request_queue_size");
            self.request_queue_size = defaults.request_queue_size;
        }
        self
    }
}

fn warn_substituted(field: &str) {
    tracing::warn!(field, "invalid fallback config value; using the default");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(FallbackConfig::default().validation_errors().is_empty());
    }

    #[test]
    fn out_of_range_fields_are_reported_and_substituted() {
        let broken = FallbackConfig {
            confidence_threshold: 1.5,
            temperature: 9.0,
            vlm_url: "ftp://nope".to_string(),
            fallback_prompt_template: "no placeholder".to_string(),
            ..FallbackConfig::default()
        };
        assert_eq!(broken.validation_errors().len(), 4);

        let fixed = broken.sanitized();
        assert!(fixed.validation_errors().is_empty());
        assert!((fixed.confidence_threshold - 0.40).abs() < f64::EPSILON);
        assert!(fixed.fallback_prompt_template.contains("{query}"));
        assert_eq!(fixed.vlm_url, "http://localhost:8080");
    }

    #[test]
    fn zero_caps_are_invalid() {
        let broken = FallbackConfig {
            max_concurrent_requests: 0,
            request_queue_size: 0,
            vlm_timeout_secs: 0,
            max_tokens: 0,
            ..FallbackConfig::default()
        };
        assert_eq!(broken.validation_errors().len(), 4);
        let fixed = broken.sanitized();
        assert_eq!(fixed.max_concurrent_requests, 10);
        assert_eq!(fixed.request_queue_size, 100);
    }
}
