//! HTTP backend for a DeepFace-style emotion-analysis service.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use emotion_core::defaults::{
    ENV_DETECTOR_BACKEND, ENV_INFERENCE_TIMEOUT_SECS, ENV_INFERENCE_URL, INFERENCE_TIMEOUT_SECS,
    INFERENCE_URL,
};
use emotion_core::{EmotionClassifier, Error, Result};

use crate::decode::{decode_rgb, encode_png};

const MODEL_NAME: &str = "deepface-emotion";

/// Classifier that calls `POST {base_url}/analyze` with the emotion action only.
pub struct HttpEmotionBackend {
    base_url: String,
    detector_backend: Option<String>,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpEmotionBackend {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            detector_backend: None,
            client: reqwest::Client::new(),
            timeout_secs: INFERENCE_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var(ENV_INFERENCE_URL).unwrap_or_else(|_| INFERENCE_URL.to_string());
        let timeout_secs = std::env::var(ENV_INFERENCE_TIMEOUT_SECS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(INFERENCE_TIMEOUT_SECS);
        let detector_backend = std::env::var(ENV_DETECTOR_BACKEND)
            .ok()
            .filter(|v| !v.is_empty());

        let mut backend = Self::new(base_url).with_timeout_secs(timeout_secs);
        backend.detector_backend = detector_backend;
        backend
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Ask the service to use a specific face detector (e.g. `opencv`, `retinaface`).
    pub fn with_detector_backend(mut self, detector: impl Into<String>) -> Self {
        self.detector_backend = Some(detector.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct AnalyzeRequest {
    img: String,
    actions: Vec<String>,
    enforce_detection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detector_backend: Option<String>,
}

#[derive(Deserialize)]
struct FaceAnalysis {
    dominant_emotion: String,
}

/// The service wraps results in `{"results": [...]}`; older versions return
/// the bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnalyzeResponse {
    Wrapped { results: Vec<FaceAnalysis> },
    Bare(Vec<FaceAnalysis>),
}

impl AnalyzeResponse {
    fn into_dominant_emotion(self) -> Option<String> {
        let faces = match self {
            AnalyzeResponse::Wrapped { results } => results,
            AnalyzeResponse::Bare(faces) => faces,
        };
        faces.into_iter().next().map(|f| f.dominant_emotion)
    }
}

#[async_trait]
impl EmotionClassifier for HttpEmotionBackend {
    #[instrument(
        skip(self, image),
        fields(subsystem = "inference", component = "http_backend", op = "classify", image_bytes = image.len())
    )]
    async fn classify(&self, image: &[u8]) -> Result<String> {
        let rgb = decode_rgb(image)?;
        let png = encode_png(&rgb)?;
        let img = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );

        let request = AnalyzeRequest {
            img,
            actions: vec!["emotion".to_string()],
            enforce_detection: false,
            detector_backend: self.detector_backend.clone(),
        };

        let url = format!("{}/analyze", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Emotion analysis request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Emotion analysis returned {}: {}",
                status, body
            )));
        }

        let result: AnalyzeResponse = response.json().await.map_err(|e| {
            Error::Inference(format!("Failed to parse emotion analysis response: {}", e))
        })?;

        let label = result
            .into_dominant_emotion()
            .ok_or_else(|| Error::Inference("Emotion analysis returned no faces".to_string()))?;
        debug!(label = %label, "Dominant emotion");
        Ok(label)
    }

    async fn health_check(&self) -> Result<bool> {
        match self
            .client
            .get(&self.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_png() -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(4, 4, Rgb([90, 60, 30]))).unwrap()
    }

    #[test]
    fn test_http_backend_new_trims_trailing_slash() {
        let backend = HttpEmotionBackend::new("http://localhost:5005/".to_string());
        assert_eq!(backend.base_url(), "http://localhost:5005");
        assert_eq!(backend.timeout_secs, INFERENCE_TIMEOUT_SECS);
        assert!(backend.detector_backend.is_none());
        assert_eq!(backend.model_name(), MODEL_NAME);
    }

    #[test]
    fn test_http_backend_builders() {
        let backend = HttpEmotionBackend::new(INFERENCE_URL.to_string())
            .with_timeout_secs(5)
            .with_detector_backend("retinaface");
        assert_eq!(backend.timeout_secs, 5);
        assert_eq!(backend.detector_backend.as_deref(), Some("retinaface"));
    }

    #[test]
    fn test_analyze_request_serialization() {
        let request = AnalyzeRequest {
            img: "data:image/png;base64,AAAA".to_string(),
            actions: vec!["emotion".to_string()],
            enforce_detection: false,
            detector_backend: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["img"], "data:image/png;base64,AAAA");
        assert_eq!(json["actions"][0], "emotion");
        assert_eq!(json["enforce_detection"], false);
        assert!(json.get("detector_backend").is_none());
    }

    #[test]
    fn test_analyze_response_wrapped_and_bare() {
        let wrapped: AnalyzeResponse = serde_json::from_str(
            r#"{"results": [{"dominant_emotion": "happy", "emotion": {"happy": 97.1}}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped.into_dominant_emotion().as_deref(), Some("happy"));

        let bare: AnalyzeResponse =
            serde_json::from_str(r#"[{"dominant_emotion": "sad"}, {"dominant_emotion": "fear"}]"#)
                .unwrap();
        assert_eq!(bare.into_dominant_emotion().as_deref(), Some("sad"));

        let empty: AnalyzeResponse = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(empty.into_dominant_emotion().is_none());
    }

    #[tokio::test]
    async fn test_classify_posts_emotion_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .and(body_partial_json(json!({
                "actions": ["emotion"],
                "enforce_detection": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"dominant_emotion": "surprise"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpEmotionBackend::new(server.uri());
        let label = backend.classify(&sample_png()).await.unwrap();
        assert_eq!(label, "surprise");
    }

    #[tokio::test]
    async fn test_classify_sends_png_data_uri() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"dominant_emotion": "neutral"}])),
            )
            .mount(&server)
            .await;

        let backend = HttpEmotionBackend::new(server.uri()).with_detector_backend("opencv");
        backend.classify(&sample_png()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["img"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(body["detector_backend"], "opencv");
    }

    #[tokio::test]
    async fn test_classify_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let backend = HttpEmotionBackend::new(server.uri());
        let err = backend.classify(&sample_png()).await.unwrap_err();
        match err {
            Error::Inference(msg) => assert!(msg.contains("500")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_classify_no_faces_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        let backend = HttpEmotionBackend::new(server.uri());
        assert!(matches!(
            backend.classify(&sample_png()).await,
            Err(Error::Inference(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_undecodable_image_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let backend = HttpEmotionBackend::new(server.uri());
        let err = backend.classify(b"not an image").await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Welcome to DeepFace API!"))
            .mount(&server)
            .await;

        let backend = HttpEmotionBackend::new(server.uri());
        assert!(backend.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let backend = HttpEmotionBackend::new("http://127.0.0.1:1".to_string());
        assert!(!backend.health_check().await.unwrap());
    }
}
