//! # emotion-inference
//!
//! Image-to-emotion classification for the emotion pipeline.
//!
//! This crate provides:
//! - Image decoding into the 8-bit RGB pixel format the model expects
//! - An HTTP backend for a DeepFace-style `/analyze` service
//! - A mock classifier for deterministic tests (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`MockEmotionClassifier`] outside this crate's tests
//! - `integration`: Enable tests that require a live analysis service
//!
//! # Example
//!
//! ```rust,no_run
//! use emotion_inference::{EmotionClassifier, HttpEmotionBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = HttpEmotionBackend::from_env();
//!     let png = std::fs::read("face.png").unwrap();
//!     let label = backend.classify(&png).await.unwrap();
//!     println!("dominant emotion: {label}");
//! }
//! ```

pub mod decode;
pub mod http;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use emotion_core::*;

pub use decode::{decode_rgb, encode_png};
pub use http::HttpEmotionBackend;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockEmotionClassifier;
