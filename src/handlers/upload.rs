//! # Upload Parsing
//!
//! Streams a `multipart/form-data` upload to disk and collects the form
//! fields `POST /` consumes: `audio_file`, `model`, `format` and `language`.
//!
//! ## Storage:
//! The audio goes into a fresh temporary directory (`whisper_trans_*`) under
//! its sanitized file name. The directory belongs to the returned
//! [`SavedUpload`]; dropping it deletes directory and file on every path,
//! success or failure.
//!
//! ## Limits:
//! Every received byte counts against the upload limit. Going over it stops
//! reading immediately and yields `AppError::PayloadTooLarge`.

use crate::error::{AppError, AppResult};
use actix_multipart::{Field, Multipart};
use futures_util::TryStreamExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use unicode_normalization::UnicodeNormalization;

pub const NO_FILE_MESSAGE: &str = "Please choose an audio file before transcribing.";
pub const INVALID_FILENAME_MESSAGE: &str = "Invalid filename. Please rename your file and try again.";

/// Device names Windows reserves regardless of extension.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "LPT1", "LPT2", "LPT3",
];

/// Reduce an uploaded file name to a safe, flat ASCII name.
///
/// ## Rules:
/// - compatibility-decomposed (NFKD), then non-ASCII characters are dropped,
///   so accented letters keep their base letter
/// - path separators become spaces, so no directory part survives
/// - runs of whitespace collapse into a single `_`
/// - only `A-Z a-z 0-9 _ . -` are kept
/// - leading and trailing `.` and `_` are stripped
/// - reserved device names get a `_` prefix
///
/// An empty result means the name is unusable.
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');

    let stem = trimmed.split('.').next().unwrap_or_default().to_ascii_uppercase();
    if !trimmed.is_empty() && RESERVED_NAMES.contains(&stem.as_str()) {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// An audio file written to its own temporary directory.
#[derive(Debug)]
pub struct SavedUpload {
    // removed with its contents on drop
    _dir: TempDir,
    path: PathBuf,
    bytes: u64,
}

impl SavedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// What arrived in the `audio_file` part.
#[derive(Debug)]
pub enum AudioUpload {
    /// No `audio_file` part at all
    Missing,
    /// A part with an empty file name (nothing was chosen in the browser)
    EmptyName,
    /// A file name that sanitizes to nothing
    InvalidName,
    Saved(SavedUpload),
}

/// All fields of one upload request.
#[derive(Debug)]
pub struct UploadForm {
    pub model: Option<String>,
    pub format: Option<String>,
    pub language: Option<String>,
    pub audio: AudioUpload,
}

/// Running byte total across all parts.
struct ByteBudget {
    received: u64,
    limit: u64,
    limit_mb: u64,
}

impl ByteBudget {
    fn take(&mut self, len: usize) -> AppResult<()> {
        self.received = self.received.saturating_add(len as u64);
        if self.received > self.limit {
            tracing::warn!(limit_mb = self.limit_mb, "Upload rejected: size limit exceeded");
            return Err(AppError::PayloadTooLarge(self.limit_mb));
        }
        Ok(())
    }
}

/// Read the whole multipart body.
///
/// Only the first `audio_file` part is kept; unknown parts are read and discarded.
pub async fn parse_upload(mut payload: Multipart, limit_bytes: u64, limit_mb: u64) -> AppResult<UploadForm> {
    let mut budget = ByteBudget {
        received: 0,
        limit: limit_bytes,
        limit_mb,
    };
    let mut form = UploadForm {
        model: None,
        format: None,
        language: None,
        audio: AudioUpload::Missing,
    };

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio_file" if matches!(form.audio, AudioUpload::Missing) => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or_default()
                    .to_string();
                form.audio = save_audio(&mut field, &filename, &mut budget).await?;
            }
            "model" => form.model = Some(read_text(&mut field, &mut budget).await?),
            "format" => form.format = Some(read_text(&mut field, &mut budget).await?),
            "language" => form.language = Some(read_text(&mut field, &mut budget).await?),
            _ => drain(&mut field, &mut budget).await?,
        }
    }

    Ok(form)
}

async fn save_audio(field: &mut Field, filename: &str, budget: &mut ByteBudget) -> AppResult<AudioUpload> {
    if filename.is_empty() {
        drain(field, budget).await?;
        return Ok(AudioUpload::EmptyName);
    }

    let safe_name = sanitize_filename(filename);
    if safe_name.is_empty() {
        tracing::info!(original = filename, "Rejected upload with unusable file name");
        drain(field, budget).await?;
        return Ok(AudioUpload::InvalidName);
    }

    let dir = tempfile::Builder::new().prefix("whisper_trans_").tempdir()?;
    let path = dir.path().join(&safe_name);
    let mut file = tokio::fs::File::create(&path).await?;

    let mut bytes = 0u64;
    while let Some(chunk) = field.try_next().await? {
        budget.take(chunk.len())?;
        file.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    file.flush().await?;

    tracing::debug!(file = %safe_name, bytes, "Upload saved");
    Ok(AudioUpload::Saved(SavedUpload { _dir: dir, path, bytes }))
}

async fn read_text(field: &mut Field, budget: &mut ByteBudget) -> AppResult<String> {
    let mut raw = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        budget.take(chunk.len())?;
        raw.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

async fn drain(field: &mut Field, budget: &mut ByteBudget) -> AppResult<()> {
    while let Some(chunk) = field.try_next().await? {
        budget.take(chunk.len())?;
    }
    Ok(())
}
