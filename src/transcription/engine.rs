//! # Transcription Engine
//!
//! The seam between the web layer and the speech model. Defines the structured
//! result every model produces, the traits a model backend implements, and the
//! invoker that validates a request before handing it to the model.
//!
//! ## Key Responsibilities:
//! - **Result structure**: full text plus ordered, timed segments
//! - **Backend seam**: `SpeechModel` (run a model) and `ModelLoader` (create one)
//! - **Invocation**: existence check, language normalisation, timing logs

use crate::error::{AppError, AppResult};
use crate::transcription::model::ModelSize;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// A timed span of transcribed speech.
///
/// `start` and `end` are offsets in seconds from the beginning of the file,
/// with `start <= end`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        let start = start.max(0.0);
        Self {
            start,
            end: end.max(start),
            text: text.into(),
        }
    }
}

/// Result of one transcription run.
///
/// Created once per request and only read afterwards; segments keep the
/// order the model produced them in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionResult {
    /// The full transcribed text (untrimmed, as the model produced it)
    pub text: String,

    /// Ordered timed segments
    pub segments: Vec<Segment>,

    /// Language used for decoding, when the model reports one
    pub language: Option<String>,
}

/// A loaded speech-to-text model.
///
/// Implementations block for the whole run; callers must keep them off the
/// async executor.
pub trait SpeechModel: Send + Sync {
    /// Transcribe the audio file at `audio_path`.
    ///
    /// `language` is an already-normalised hint; `None` requests auto-detection.
    fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> anyhow::Result<TranscriptionResult>;
}

/// Shared handle to a loaded model, one per model size.
pub type ModelHandle = Arc<dyn SpeechModel>;

/// Creates models on demand. Loading may download weights and take minutes.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, size: ModelSize) -> anyhow::Result<ModelHandle>;
}

/// Trim a language hint; blank hints mean "detect automatically".
pub fn normalize_language(language: Option<&str>) -> Option<&str> {
    language.map(str::trim).filter(|lang| !lang.is_empty())
}

/// Run `model` on `file_path`.
///
/// ## Errors:
/// - **NotFound**: the file disappeared between upload and invocation
/// - **Transcription**: anything the model or audio decoder raised
///
/// Blocks for as long as the model needs; there is no upper bound.
pub fn transcribe(
    model: &dyn SpeechModel,
    file_path: &Path,
    language: Option<&str>,
) -> AppResult<TranscriptionResult> {
    if !file_path.exists() {
        return Err(AppError::NotFound(format!(
            "Audio file not found: {}",
            file_path.display()
        )));
    }

    let language = normalize_language(language);
    tracing::info!(
        file = %file_path.display(),
        language = language.unwrap_or("auto"),
        "Transcribing audio file"
    );

    let start_time = Instant::now();
    let result = model.transcribe(file_path, language)?;

    tracing::info!(
        segments = result.segments.len(),
        chars = result.text.len(),
        language = result.language.as_deref().unwrap_or("unknown"),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Transcription completed"
    );

    Ok(result)
}
