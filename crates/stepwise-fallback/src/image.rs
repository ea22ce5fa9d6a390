//! Image acquisition for delegated queries.
//!
//! Sources are consulted in priority order: live camera, the tracker's
//! last observed frame, then the in-memory last-capture cache. Bytes run
//! through the preprocessing contract and are base64-encoded for
//! transport. Every failure degrades silently; the caller falls back to a
//! text-only prompt when no source yields an image.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Serialize;

use stepwise_tracker::StateTracker;

use crate::error::FallbackError;

/// Live camera seam. External; any failure is treated as "no frame".
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Capture the current frame, when one is available.
    async fn capture_frame(&self) -> Option<Vec<u8>>;
}

/// Image preprocessing contract: `(bytes, model_tag) -> bytes`.
pub trait ImagePreprocessor: Send + Sync {
    /// Prepare raw frame bytes for the given model.
    ///
    /// # Errors
    /// Implementations report unusable input; the pipeline then ships the
    /// raw bytes instead.
    fn preprocess(&self, bytes: &[u8], model_tag: &str) -> Result<Vec<u8>, FallbackError>;
}

/// Preprocessor that passes bytes through unchanged.
pub struct PassthroughPreprocessor;

impl ImagePreprocessor for PassthroughPreprocessor {
    fn preprocess(&self, bytes: &[u8], _model_tag: &str) -> Result<Vec<u8>, FallbackError> {
        Ok(bytes.to_vec())
    }
}

/// A transport-ready image.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedImage {
    /// Base64-encoded image bytes.
    pub data_b64: String,
    /// Image format tag used in the data URL.
    pub format: String,
    /// Size in bytes of the (possibly preprocessed) image.
    pub size: usize,
    /// Whether preprocessing succeeded.
    pub processed: bool,
    /// When the image was prepared.
    pub timestamp: DateTime<Utc>,
}

/// Source-chained image capture with preprocessing and a capture cache.
pub struct ImageCapture {
    camera: Option<Arc<dyn CameraSource>>,
    tracker: Option<StateTracker>,
    preprocessor: Arc<dyn ImagePreprocessor>,
    model_tag: String,
    last_capture: Mutex<Option<Vec<u8>>>,
}

impl ImageCapture {
    /// Build the capture pipeline. Either source may be absent.
    #[must_use]
    pub fn new(
        camera: Option<Arc<dyn CameraSource>>,
        tracker: Option<StateTracker>,
        preprocessor: Arc<dyn ImagePreprocessor>,
        model_tag: &str,
    ) -> Self {
        Self {
            camera,
            tracker,
            preprocessor,
            model_tag: model_tag.to_string(),
            last_capture: Mutex::new(None),
        }
    }

    /// Fetch the best available current image, or `None` when every source
    /// comes up empty.
    pub async fn current_image(&self) -> Option<CapturedImage> {
        let bytes = self.first_available_frame().await?;
        if let Ok(mut cache) = self.last_capture.lock() {
            *cache = Some(bytes.clone());
        }
        Some(self.prepare(bytes))
    }

    async fn first_available_frame(&self) -> Option<Vec<u8>> {
        if let Some(camera) = &self.camera
            && let Some(frame) = camera.capture_frame().await
            && !frame.is_empty()
        {
            tracing::debug!(bytes = frame.len(), "image source: camera");
            return Some(frame);
        }
        if let Some(tracker) = &self.tracker
            && let Some(frame) = tracker.last_frame().await
            && !frame.is_empty()
        {
            tracing::debug!(bytes = frame.len(), "image source: tracker last frame");
            return Some(frame);
        }
        let cached = self
            .last_capture
            .lock()
            .ok()
            .and_then(|cache| cache.clone())
            .filter(|frame| !frame.is_empty());
        if let Some(frame) = cached {
            tracing::debug!(bytes = frame.len(), "image source: capture cache");
            return Some(frame);
        }
        tracing::debug!("no image source produced a frame");
        None
    }

    fn prepare(&self, bytes: Vec<u8>) -> CapturedImage {
        match self.preprocessor.preprocess(&bytes, &self.model_tag) {
            Ok(processed) => CapturedImage {
                data_b64: BASE64.encode(&processed),
                format: "jpeg".to_string(),
                size: processed.len(),
                processed: true,
                timestamp: Utc::now(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "image preprocessing failed; sending raw bytes");
                CapturedImage {
                    data_b64: BASE64.encode(&bytes),
                    format: "jpeg".to_string(),
                    size: bytes.len(),
                    processed: false,
                    timestamp: Utc::now(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCamera(Vec<u8>);

    #[async_trait]
    impl CameraSource for FixedCamera {
        async fn capture_frame(&self) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }
    }

    struct FailingPreprocessor;

    impl ImagePreprocessor for FailingPreprocessor {
        fn preprocess(&self, _bytes: &[u8], _model_tag: &str) -> Result<Vec<u8>, FallbackError> {
            Err(FallbackError::VlmParse("unsupported".to_string()))
        }
    }

    fn capture_with_camera(frame: Vec<u8>) -> ImageCapture {
        ImageCapture::new(
            Some(Arc::new(FixedCamera(frame))),
            None,
            Arc::new(PassthroughPreprocessor),
            "smolvlm",
        )
    }

    #[tokio::test]
    async fn camera_frame_is_encoded() {
        let capture = capture_with_camera(vec![1, 2, 3]);
        let image = capture.current_image().await.unwrap();
        assert_eq!(image.data_b64, BASE64.encode([1, 2, 3]));
        assert_eq!(image.size, 3);
        assert!(image.processed);
        assert_eq!(image.format, "jpeg");
    }

    #[tokio::test]
    async fn empty_sources_yield_none() {
        let capture = ImageCapture::new(None, None, Arc::new(PassthroughPreprocessor), "smolvlm");
        assert!(capture.current_image().await.is_none());
    }

    #[tokio::test]
    async fn empty_camera_frame_is_skipped() {
        let capture = capture_with_camera(Vec::new());
        assert!(capture.current_image().await.is_none());
    }

    #[tokio::test]
    async fn preprocess_failure_falls_back_to_raw_bytes() {
        let capture = ImageCapture::new(
            Some(Arc::new(FixedCamera(vec![9, 9]))),
            None,
            Arc::new(FailingPreprocessor),
            "smolvlm",
        );
        let image = capture.current_image().await.unwrap();
        assert!(!image.processed);
        assert_eq!(image.size, 2);
    }

    #[tokio::test]
    async fn cache_serves_after_camera_goes_away() {
        let capture = capture_with_camera(vec![7, 7, 7]);
        assert!(capture.current_image().await.is_some());
        // Rebuild the chain without a camera but with the warmed cache.
        let cached = capture.last_capture.lock().unwrap().clone();
        let capture = ImageCapture {
            camera: None,
            tracker: None,
            preprocessor: Arc::new(PassthroughPreprocessor),
            model_tag: "smolvlm".to_string(),
            last_capture: Mutex::new(cached),
        };
        let image = capture.current_image().await.unwrap();
        assert_eq!(image.size, 3);
    }
}
