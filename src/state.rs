//! # Application State Management
//!
//! Shared state handed to every HTTP handler. Each actix worker gets its own
//! `web::Data<AppState>`, but all of them point at the same caches through
//! `Arc`, so a model loaded by one worker is visible to every other one.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: shared ownership of the caches across worker threads
//! - **Cloning**: `AppState::clone` copies pointers, never the models or results
//!
//! ### Interior mutability
//! - The caches and the heartbeat lock internally, so handlers only ever need `&AppState`
//! - Lock scopes are short and never held across an `.await`
//!
//! ### Trait objects
//! - `Arc<dyn ModelLoader>` and `Arc<dyn Terminator>` let tests swap in stubs
//!   without generics leaking into every handler signature

use crate::config::AppConfig;
use crate::flash::FlashStore;
use crate::lifecycle::heartbeat::{self, Heartbeat};
use crate::lifecycle::terminate::{self, ShutdownReason, Terminator};
use crate::results::ResultCache;
use crate::transcription::{ModelCache, ModelLoader};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration; fixed after startup
    pub config: Arc<AppConfig>,

    /// Loaded models, one per size
    pub models: Arc<ModelCache>,

    /// Rendered transcriptions keyed by opaque handle
    pub results: Arc<ResultCache>,

    /// Pending one-shot error messages
    pub flashes: Arc<FlashStore>,

    /// Last time the page checked in
    pub heartbeat: Arc<Heartbeat>,

    /// How the process ends on idle timeout or Quit
    pub terminator: Arc<dyn Terminator>,

    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, loader: Arc<dyn ModelLoader>, terminator: Arc<dyn Terminator>) -> Self {
        let flashes = FlashStore::new(&config.server.secret_key);
        Self {
            config: Arc::new(config),
            models: Arc::new(ModelCache::new(loader)),
            results: Arc::new(ResultCache::new()),
            flashes: Arc::new(flashes),
            heartbeat: Arc::new(Heartbeat::new()),
            terminator,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_heartbeat(&self) {
        self.heartbeat.record();
    }

    /// Exit after the configured delay so the current response can be delivered.
    pub fn request_shutdown(&self) -> JoinHandle<()> {
        tracing::info!("Shutdown requested from the web interface");
        terminate::schedule_termination(
            Arc::clone(&self.terminator),
            self.config.lifecycle.shutdown_delay(),
            ShutdownReason::Requested,
        )
    }

    /// Start the idle monitor for this state's heartbeat.
    pub fn spawn_heartbeat_monitor(&self) -> JoinHandle<()> {
        heartbeat::spawn_monitor(
            Arc::clone(&self.heartbeat),
            self.config.lifecycle.heartbeat_interval(),
            self.config.lifecycle.idle_timeout(),
            Arc::clone(&self.terminator),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, RecordingTerminator, StubLoader};
    use std::time::Duration;

    #[test]
    fn test_clones_share_caches() {
        let state = AppState::new(
            test_config(),
            Arc::new(StubLoader::default()),
            Arc::new(RecordingTerminator::default()),
        );
        let clone = state.clone();

        let handle = state.results.put("shared".to_string());
        assert_eq!(clone.results.get(&handle).as_deref(), Some("shared"));

        clone.record_heartbeat();
        assert!(state.heartbeat.last_seen().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_shutdown_terminates_after_delay() {
        let terminator = Arc::new(RecordingTerminator::default());
        let mut config = test_config();
        config.lifecycle.shutdown_delay_ms = 1000;
        let state = AppState::new(config, Arc::new(StubLoader::default()), terminator.clone());

        let task = state.request_shutdown();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(terminator.reasons().is_empty());

        task.await.unwrap();
        assert_eq!(terminator.reasons(), vec![ShutdownReason::Requested]);
    }
}
