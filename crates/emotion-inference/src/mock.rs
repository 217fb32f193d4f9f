//! Mock emotion classifier for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use emotion_inference::MockEmotionClassifier;
//!
//! let classifier = MockEmotionClassifier::new()
//!     .with_label("neutral")
//!     .with_mapping(b"smile".to_vec(), "happy")
//!     .failing_on(b"blurry".to_vec());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use emotion_core::{EmotionClassifier, Error, Result};

/// Mock classifier returning configured labels per input.
#[derive(Clone)]
pub struct MockEmotionClassifier {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    default_label: String,
    mappings: HashMap<Vec<u8>, String>,
    failures: HashSet<Vec<u8>>,
    fail_all: bool,
    latency_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            default_label: "neutral".to_string(),
            mappings: HashMap::new(),
            failures: HashSet::new(),
            fail_all: false,
            latency_ms: 0,
        }
    }
}

impl MockEmotionClassifier {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Label returned for inputs with no mapping.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_label = label.into();
        self
    }

    /// Return `label` when classifying exactly `input`.
    pub fn with_mapping(mut self, input: impl Into<Vec<u8>>, label: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .mappings
            .insert(input.into(), label.into());
        self
    }

    /// Fail when classifying exactly `input`.
    pub fn failing_on(mut self, input: impl Into<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.config)
            .failures
            .insert(input.into());
        self
    }

    /// Fail every call.
    pub fn always_failing(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_all = true;
        self
    }

    /// Set simulated latency for each call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Inputs seen so far, in call order.
    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MockEmotionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmotionClassifier for MockEmotionClassifier {
    async fn classify(&self, image: &[u8]) -> Result<String> {
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(image.to_vec());

        if self.config.latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.config.latency_ms)).await;
        }

        if self.config.fail_all || self.config.failures.contains(image) {
            return Err(Error::Inference("Simulated classifier failure".to_string()));
        }

        Ok(self
            .config
            .mappings
            .get(image)
            .cloned()
            .unwrap_or_else(|| self.config.default_label.clone()))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.config.fail_all)
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_label() {
        let classifier = MockEmotionClassifier::new();
        assert_eq!(classifier.classify(b"any").await.unwrap(), "neutral");

        let classifier = MockEmotionClassifier::new().with_label("happy");
        assert_eq!(classifier.classify(b"any").await.unwrap(), "happy");
    }

    #[tokio::test]
    async fn test_mapping_and_failures() {
        let classifier = MockEmotionClassifier::new()
            .with_mapping(b"frown".to_vec(), "sad")
            .failing_on(b"broken".to_vec());

        assert_eq!(classifier.classify(b"frown").await.unwrap(), "sad");
        assert!(classifier.classify(b"broken").await.is_err());
        assert_eq!(classifier.classify(b"other").await.unwrap(), "neutral");
        assert_eq!(classifier.call_count(), 3);
        assert_eq!(classifier.calls()[1], b"broken".to_vec());
    }

    #[tokio::test]
    async fn test_always_failing() {
        let classifier = MockEmotionClassifier::new().always_failing();
        assert!(classifier.classify(b"x").await.is_err());
        assert!(!classifier.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let classifier = MockEmotionClassifier::new();
        let clone = classifier.clone();
        clone.classify(b"a").await.unwrap();
        assert_eq!(classifier.call_count(), 1);
        assert_eq!(classifier.model_name(), "mock");
    }
}
