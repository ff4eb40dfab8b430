//! Test doubles shared by the unit tests.

use crate::config::AppConfig;
use crate::lifecycle::terminate::{ShutdownReason, Terminator};
use crate::state::AppState;
use crate::transcription::engine::{ModelHandle, Segment, SpeechModel, TranscriptionResult};
use crate::transcription::{ModelLoader, ModelSize};
use anyhow::anyhow;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration safe for tests: private lock file, no browser, short delays.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.server.secret_key = "test-secret".to_string();
    config.lifecycle.lock_file = std::env::temp_dir().join(format!("whispertrans-test-{}.lock", uuid::Uuid::new_v4()));
    config.lifecycle.open_browser = false;
    config.lifecycle.shutdown_delay_ms = 10;
    config
}

#[derive(Debug, Clone)]
pub struct ModelCall {
    pub path: PathBuf,
    pub path_existed: bool,
    pub language: Option<String>,
}

/// Returns a fixed two-segment result, or a fixed error, and records every call.
#[derive(Default)]
pub struct StubModel {
    failure: Option<String>,
    calls: Mutex<Vec<ModelCall>>,
}

impl StubModel {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn languages(&self) -> Vec<Option<String>> {
        self.calls().into_iter().map(|c| c.language).collect()
    }

    pub fn sample_result() -> TranscriptionResult {
        TranscriptionResult {
            text: " Hello from the stub. Second sentence.".to_string(),
            segments: vec![
                Segment::new(0.0, 1.5, " Hello from the stub."),
                Segment::new(1.5, 3.25, " Second sentence."),
            ],
            language: Some("en".to_string()),
        }
    }
}

impl SpeechModel for StubModel {
    fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> anyhow::Result<TranscriptionResult> {
        self.calls.lock().unwrap().push(ModelCall {
            path: audio_path.to_path_buf(),
            path_existed: audio_path.exists(),
            language: language.map(str::to_string),
        });
        match &self.failure {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(Self::sample_result()),
        }
    }
}

/// Hands out one shared [`StubModel`] and records which sizes were loaded.
pub struct StubLoader {
    model: Arc<StubModel>,
    delay: Duration,
    fail_next: AtomicBool,
    loads: Mutex<Vec<ModelSize>>,
}

impl Default for StubLoader {
    fn default() -> Self {
        Self::with_model(Arc::new(StubModel::default()))
    }
}

impl StubLoader {
    pub fn with_model(model: Arc<StubModel>) -> Self {
        Self {
            model,
            delay: Duration::ZERO,
            fail_next: AtomicBool::new(false),
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing_once() -> Self {
        let loader = Self::default();
        loader.fail_next.store(true, Ordering::SeqCst);
        loader
    }

    pub fn loads(&self) -> Vec<ModelSize> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelLoader for StubLoader {
    async fn load(&self, size: ModelSize) -> anyhow::Result<ModelHandle> {
        self.loads.lock().unwrap().push(size);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("download interrupted"));
        }
        Ok(self.model.clone())
    }
}

/// Records termination requests instead of exiting.
#[derive(Default)]
pub struct RecordingTerminator {
    reasons: Mutex<Vec<ShutdownReason>>,
}

impl RecordingTerminator {
    pub fn reasons(&self) -> Vec<ShutdownReason> {
        self.reasons.lock().unwrap().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, reason: ShutdownReason) {
        self.reasons.lock().unwrap().push(reason);
    }
}

/// State wired to stubs, plus handles to inspect them.
pub struct TestHarness {
    pub state: AppState,
    pub model: Arc<StubModel>,
    pub loader: Arc<StubLoader>,
    pub terminator: Arc<RecordingTerminator>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_model(StubModel::default(), test_config())
    }

    pub fn with_model(model: StubModel, config: AppConfig) -> Self {
        let model = Arc::new(model);
        let loader = Arc::new(StubLoader::with_model(model.clone()));
        let terminator = Arc::new(RecordingTerminator::default());
        let state = AppState::new(config, loader.clone(), terminator.clone());
        Self {
            state,
            model,
            loader,
            terminator,
        }
    }
}

/// Build a `multipart/form-data` body. Returns the content type and the body.
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> (String, Vec<u8>) {
    const BOUNDARY: &str = "----whispertrans-test-boundary";
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes());
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    if let Some((filename, contents)) = file {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"audio_file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(contents);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}
