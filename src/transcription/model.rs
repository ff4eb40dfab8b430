//! # Whisper Model Management
//!
//! Model sizes offered by the upload form and the Candle-backed Whisper model
//! that serves them.
//!
//! ## Model Loading Process:
//! 1. Resolve the Hugging Face repository and revision for the size
//! 2. Download `config.json`, `tokenizer.json` and `model.safetensors` (cached locally)
//! 3. Build the mel filter bank for the model's mel bin count
//! 4. Initialise the weights on the configured device
//!
//! ## Decoding:
//! Audio is processed in 30 second windows. Each window is decoded greedily with
//! timestamp tokens enabled; timestamp pairs delimit the segments.

use crate::audio;
use crate::device;
use crate::transcription::engine::{ModelHandle, ModelLoader, Segment, SpeechModel, TranscriptionResult};
use crate::transcription::languages;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio as whisper_audio, Config};
use hf_hub::api::tokio::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

/// Available Whisper model sizes.
///
/// ## Trade-offs:
/// Larger models are more accurate but slower and need more memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Every size, in the order the form lists them.
    pub const ALL: [ModelSize; 5] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
    ];

    /// Form value and log name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        }
    }

    /// Interpret a submitted form value. Unknown or missing values mean `Base`.
    pub fn from_form(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(ModelSize::Base)
    }

    /// Hugging Face repository and the revision carrying safetensors weights.
    pub fn repo(&self) -> (&'static str, &'static str) {
        match self {
            ModelSize::Tiny => ("openai/whisper-tiny", "main"),
            ModelSize::Base => ("openai/whisper-base", "refs/pr/22"),
            ModelSize::Small => ("openai/whisper-small", "main"),
            ModelSize::Medium => ("openai/whisper-medium", "main"),
            ModelSize::Large => ("openai/whisper-large-v2", "refs/pr/57"),
        }
    }

    /// Label shown next to the option in the upload form.
    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Tiny (fastest, basic accuracy)",
            ModelSize::Base => "Base (fast, good accuracy)",
            ModelSize::Small => "Small (balanced)",
            ModelSize::Medium => "Medium (accurate, slower)",
            ModelSize::Large => "Large (best accuracy, slowest)",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token ids the decoder needs, looked up in the model's own tokenizer.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    transcribe: u32,
    eot: u32,
    /// First timestamp token; every id at or above it is `<|t|>` in 20 ms steps.
    timestamp_begin: u32,
}

impl SpecialTokens {
    fn from_tokenizer(tokenizer: &Tokenizer) -> Result<Self> {
        let lookup = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("Tokenizer has no {} token", token))
        };

        Ok(Self {
            sot: lookup(m::SOT_TOKEN)?,
            transcribe: lookup(m::TRANSCRIBE_TOKEN)?,
            eot: lookup(m::EOT_TOKEN)?,
            timestamp_begin: lookup(m::NO_TIMESTAMPS_TOKEN)? + 1,
        })
    }
}

/// Seconds per timestamp token step.
const TIMESTAMP_STEP: f64 = 0.02;

/// A loaded Whisper model ready for transcription.
///
/// ## Thread Safety:
/// The decoder keeps a cross-attention cache that needs `&mut`, so the
/// network sits behind a mutex. Concurrent requests for the same size are
/// serialised; different sizes run independently.
pub struct WhisperModel {
    model: Mutex<m::model::Whisper>,
    config: Config,
    device: Device,
    size: ModelSize,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    tokens: SpecialTokens,
}

impl WhisperModel {
    /// Load a Whisper model from Hugging Face.
    ///
    /// ## Parameters:
    /// - **size**: which model size to load
    /// - **device**: where the weights live (CPU/GPU)
    /// - **cache_dir**: hub cache override; `None` keeps the hub default
    pub async fn load(size: ModelSize, device: Device, cache_dir: Option<PathBuf>) -> Result<Self> {
        let (repo_name, revision) = size.repo();
        tracing::info!(model = %size, repo = repo_name, revision, "Loading Whisper model");
        let start_time = std::time::Instant::now();

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        if let Some(dir) = cache_dir {
            tracing::debug!("Using model cache directory {}", dir.display());
            builder = builder.with_cache_dir(dir);
        }
        let api = builder
            .build()
            .context("Failed to initialise the Hugging Face hub client")?;

        let repo = api.repo(Repo::with_revision(
            repo_name.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        let config_path = repo
            .get("config.json")
            .await
            .with_context(|| format!("Failed to download config.json from {}", repo_name))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .with_context(|| format!("Failed to download tokenizer.json from {}", repo_name))?;
        let weights_path = repo
            .get("model.safetensors")
            .await
            .with_context(|| format!("Failed to download model weights from {}", repo_name))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(&config_path)?)
            .context("Failed to parse model config")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = SpecialTokens::from_tokenizer(&tokenizer)?;
        let mel_filters = mel_filter_bank(config.num_mel_bins, m::N_FFT, m::SAMPLE_RATE);

        // SAFETY: the weights file lives in the hub cache and is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            model = %size,
            device = device::device_label(&device),
            "Whisper model loaded in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model: Mutex::new(model),
            config,
            device,
            size,
            tokenizer,
            mel_filters,
            tokens,
        })
    }

    /// Pick the language token: from the hint when given, detected otherwise.
    fn resolve_language(
        &self,
        model: &mut m::model::Whisper,
        first_window: &Tensor,
        hint: Option<&str>,
    ) -> Result<(&'static str, u32)> {
        match hint {
            Some(hint) => {
                let code = languages::resolve(hint)
                    .ok_or_else(|| anyhow!("Unsupported language: {}", hint))?;
                let token = self
                    .tokenizer
                    .token_to_id(&languages::token(code))
                    .ok_or_else(|| anyhow!("Model {} does not support language {}", self.size, code))?;
                Ok((code, token))
            }
            None => self.detect_language(model, first_window),
        }
    }

    /// Run the decoder on `<|startoftranscript|>` alone and pick the most
    /// likely language token.
    fn detect_language(&self, model: &mut m::model::Whisper, mel: &Tensor) -> Result<(&'static str, u32)> {
        let candidates: Vec<(&'static str, u32)> = languages::CODES
            .iter()
            .filter_map(|code| {
                self.tokenizer
                    .token_to_id(&languages::token(code))
                    .map(|id| (*code, id))
            })
            .collect();
        if candidates.is_empty() {
            return Err(anyhow!("Model {} has no language tokens", self.size));
        }

        let audio_features = model.encoder.forward(mel, true)?;
        let tokens = Tensor::new(&[[self.tokens.sot]], &self.device)?;
        let hidden = model.decoder.forward(&tokens, &audio_features, true)?;
        let logits = model.decoder.final_linear(&hidden.i(..1)?)?.i(0)?.i(0)?;

        let ids: Vec<u32> = candidates.iter().map(|(_, id)| *id).collect();
        let ids = Tensor::new(ids.as_slice(), &self.device)?;
        let scores = logits.index_select(&ids, 0)?.to_vec1::<f32>()?;

        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| candidates[idx])
            .ok_or_else(|| anyhow!("Language detection produced no scores"))?;

        tracing::debug!(language = best.0, "Detected language");
        Ok(best)
    }

    /// Greedily decode one mel window, returning the generated tokens.
    fn decode_window(&self, model: &mut m::model::Whisper, mel: &Tensor, language_token: u32) -> Result<Vec<u32>> {
        let audio_features = model.encoder.forward(mel, true)?;
        let mut tokens = vec![self.tokens.sot, language_token, self.tokens.transcribe];
        let prompt_len = tokens.len();
        let sample_len = self.config.max_target_positions / 2;

        for i in 0..sample_len {
            let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let hidden = model.decoder.forward(&input, &audio_features, i == 0)?;
            let (_, seq_len, _) = hidden.dims3()?;
            let logits = model
                .decoder
                .final_linear(&hidden.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let next = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next == self.tokens.eot || tokens.len() >= self.config.max_target_positions {
                break;
            }
            if is_repetitive(&tokens[prompt_len..], next) {
                tracing::debug!("Stopping window decode on repeated output");
                break;
            }
            tokens.push(next);
        }

        Ok(tokens.split_off(prompt_len))
    }

    /// Turn a window's tokens into segments using the timestamp pairs.
    ///
    /// Text after the last closing timestamp becomes a segment ending at
    /// `window_end`.
    fn split_segments(&self, tokens: &[u32], offset: f64, window_end: f64) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut start: Option<f64> = None;
        let mut text_tokens: Vec<u32> = Vec::new();

        for &token in tokens {
            if token >= self.tokens.timestamp_begin {
                let time = offset + f64::from(token - self.tokens.timestamp_begin) * TIMESTAMP_STEP;
                match start {
                    Some(seg_start) if !text_tokens.is_empty() => {
                        segments.push(Segment::new(seg_start, time, self.decode_text(&text_tokens)?));
                        text_tokens.clear();
                        start = None;
                    }
                    _ => start = Some(time),
                }
            } else if token < self.tokens.eot {
                text_tokens.push(token);
            }
        }

        if !text_tokens.is_empty() {
            let seg_start = start.unwrap_or(offset);
            segments.push(Segment::new(seg_start, window_end, self.decode_text(&text_tokens)?));
        }

        segments.retain(|segment| !segment.text.trim().is_empty());
        Ok(segments)
    }

    fn decode_text(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))
    }
}

impl SpeechModel for WhisperModel {
    fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<TranscriptionResult> {
        let samples = audio::decode_file(audio_path)?;

        let mel = whisper_audio::pcm_to_mel(&self.config, &samples, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let mel_frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_frames), &self.device)?;

        // The mel computation pads to whole windows; only decode frames with audio in them.
        let content_frames = (samples.len() / m::HOP_LENGTH).clamp(1, mel_frames);

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("Whisper {} model is unusable after an earlier panic", self.size))?;

        let first_window = mel.narrow(2, 0, content_frames.min(m::N_FRAMES))?;
        let (language, language_token) = self.resolve_language(&mut model, &first_window, language)?;

        let mut segments = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            let window_frames = (content_frames - seek).min(m::N_FRAMES);
            let window = mel.narrow(2, seek, window_frames)?;
            let offset = frames_to_seconds(seek);
            let window_end = frames_to_seconds(seek + window_frames);

            let tokens = self.decode_window(&mut model, &window, language_token)?;
            let window_segments = self.split_segments(&tokens, offset, window_end)?;
            tracing::debug!(
                offset_secs = offset,
                segments = window_segments.len(),
                "Decoded window"
            );
            segments.extend(window_segments);
            seek += window_frames;
        }

        let text = segments.iter().map(|s| s.text.as_str()).collect::<String>();
        Ok(TranscriptionResult {
            text,
            segments,
            language: Some(language.to_string()),
        })
    }
}

fn frames_to_seconds(frames: usize) -> f64 {
    (frames * m::HOP_LENGTH) as f64 / m::SAMPLE_RATE as f64
}

/// Check whether appending `next` would repeat the tail of `tokens`.
fn is_repetitive(tokens: &[u32], next: u32) -> bool {
    let len = tokens.len();
    if len >= 3 && tokens[len - 3..].iter().all(|&t| t == next) {
        return true;
    }
    if len >= 9 {
        // last four tokens plus `next` equal the five before them
        let window = [&tokens[len - 4..], &[next][..]].concat();
        return window[..] == tokens[len - 9..len - 4];
    }
    false
}

/// Slaney-style mel filter bank, laid out as `n_mels` rows of `n_fft / 2 + 1` weights.
pub fn mel_filter_bank(n_mels: usize, n_fft: usize, sample_rate: usize) -> Vec<f32> {
    let n_freqs = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for mel in 0..n_mels {
        let (lower, center, upper) = (edges[mel], edges[mel + 1], edges[mel + 2]);
        let norm = 2.0 / (upper - lower);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            filters[mel * n_freqs + k] = (rising.min(falling).max(0.0) * norm) as f32;
        }
    }
    filters
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(freq: f64) -> f64 {
    if freq >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (freq / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    } else {
        freq / MEL_F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        MEL_F_SP * mel
    }
}

/// Loads [`WhisperModel`]s from Hugging Face on the configured device.
pub struct WhisperLoader {
    device_preference: String,
    cache_dir: Option<PathBuf>,
}

impl WhisperLoader {
    pub fn new(device_preference: impl Into<String>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            device_preference: device_preference.into(),
            cache_dir,
        }
    }

    pub fn from_config(config: &crate::config::ModelsConfig) -> Self {
        let cache_dir = Some(config.cache_dir.trim())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        Self::new(config.device.clone(), cache_dir)
    }
}

#[async_trait]
impl ModelLoader for WhisperLoader {
    async fn load(&self, size: ModelSize) -> Result<ModelHandle> {
        let device = device::resolve_device(&self.device_preference);
        let model = WhisperModel::load(size, device, self.cache_dir.clone()).await?;
        Ok(Arc::new(model))
    }
}
