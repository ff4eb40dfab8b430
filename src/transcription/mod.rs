//! # Transcription Module
//!
//! Speech-to-text with Whisper models running on Candle, plus everything
//! between a saved upload and the rendered output.
//!
//! ## Key Components:
//! - **Engine**: result types, the model traits and the invoker
//! - **Model**: model sizes and the Candle Whisper backend
//! - **Cache**: one loaded model per size, shared by all requests
//! - **Format**: txt / srt / vtt rendering
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, the default
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good with technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod cache;     // Per-size model cache
pub mod engine;    // Result types, model traits, invoker
pub mod format;    // Output rendering
pub mod languages; // Language codes and names
pub mod model;     // Model sizes and the Candle backend

pub use cache::ModelCache;
pub use engine::ModelLoader;
pub use format::{format_output, OutputFormat};
pub use model::{ModelSize, WhisperLoader};
