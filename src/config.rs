//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nesting levels)
//! - The well-known variables `PORT`, `HOST`, `MAX_UPLOAD_SIZE` and `SECRET_KEY`
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known variables (PORT, HOST, MAX_UPLOAD_SIZE, SECRET_KEY)
//! 2. Prefixed environment variables (APP_SERVER__PORT, APP_LIFECYCLE__IDLE_TIMEOUT_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Port tried first when neither `PORT` nor the config file set one.
pub const DEFAULT_PORT: u16 = 5000;

/// Upload limit (megabytes) used when `MAX_UPLOAD_SIZE` is absent or not a number.
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 200;

/// Placeholder signing secret. Anything signed with it can be forged by
/// anyone who has read this file.
pub const DEFAULT_SECRET_KEY: &str = "change-me";

/// File name of the single-instance lock inside the system temp directory.
pub const LOCK_FILE_NAME: &str = "whispertrans.lock";

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where to listen and how to treat uploads
/// - `lifecycle`: single-instance lock, heartbeat and shutdown timings
/// - `models`: which Whisper model to fall back to and where to run it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub lifecycle: LifecycleConfig,
    pub models: ModelsConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind (`127.0.0.1` keeps the tool private to this machine)
/// - `port`: first TCP port to try
/// - `port_search_range`: how many ports after `port` are probed when it is taken
/// - `max_upload_size_mb`: largest accepted upload, in megabytes
/// - `secret_key`: master secret for signing the flash cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub port_search_range: u16,
    pub max_upload_size_mb: u64,
    pub secret_key: String,
}

/// Process lifecycle settings.
///
/// ## Fields:
/// - `lock_file`: path of the single-instance lock record
/// - `heartbeat_interval_secs`: how often the idle monitor wakes up
/// - `idle_timeout_secs`: heartbeat silence after which the process exits
/// - `readiness_timeout_secs`: how long to wait for the listener before opening a browser
/// - `shutdown_delay_ms`: grace period between the shutdown response and exit
/// - `open_browser`: whether to open the default browser once the server answers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub lock_file: PathBuf,
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub readiness_timeout_secs: u64,
    pub shutdown_delay_ms: u64,
    pub open_browser: bool,
}

/// Whisper model settings.
///
/// ## Fields:
/// - `device`: compute device preference ("auto", "cpu", "cuda", "metal")
/// - `cache_dir`: Hugging Face cache directory; empty means the hub default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub device: String,
    pub cache_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: DEFAULT_PORT,
                port_search_range: 100,
                max_upload_size_mb: DEFAULT_MAX_UPLOAD_MB,
                secret_key: DEFAULT_SECRET_KEY.to_string(),
            },
            lifecycle: LifecycleConfig {
                lock_file: env::temp_dir().join(LOCK_FILE_NAME),
                heartbeat_interval_secs: 5,
                idle_timeout_secs: 60,
                readiness_timeout_secs: 10,
                shutdown_delay_ms: 1000,
                open_browser: true,
            },
            models: ModelsConfig {
                device: "auto".to_string(),
                cache_dir: String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment and `config.toml`.
    pub fn load() -> Result<Self> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration, resolving the well-known variables through `lookup`.
    ///
    /// ## Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Apply PORT, HOST, MAX_UPLOAD_SIZE and SECRET_KEY
    ///
    /// ## Environment Variable Examples:
    /// - `PORT=5001`: first port to try
    /// - `MAX_UPLOAD_SIZE=50`: 50 MB upload limit (`abc` falls back to 200)
    /// - `APP_LIFECYCLE__OPEN_BROWSER=false`: stay headless
    /// - `APP_MODELS__DEVICE=cpu`: never touch the GPU
    pub fn load_from<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Some(host) = lookup("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Some(port) = lookup("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Some(limit) = lookup("MAX_UPLOAD_SIZE") {
            let limit_mb = parse_upload_limit_mb(&limit);
            settings = settings.set_override("server.max_upload_size_mb", limit_mb as i64)?;
        }

        if let Some(secret) = lookup("SECRET_KEY") {
            settings = settings.set_override("server.secret_key", secret)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.max_upload_size_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.server.secret_key.is_empty() {
            return Err(anyhow::anyhow!("Secret key cannot be empty"));
        }

        if self.lifecycle.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.lifecycle.idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Idle timeout must be greater than 0"));
        }

        if self.lifecycle.lock_file.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Lock file path cannot be empty"));
        }

        Ok(())
    }

    /// Largest accepted upload in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.server.max_upload_size_mb.saturating_mul(1024 * 1024)
    }

    /// True while the flash cookie is signed with the shipped placeholder.
    pub fn uses_placeholder_secret(&self) -> bool {
        self.server.secret_key == DEFAULT_SECRET_KEY
    }
}

impl LifecycleConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_delay_ms)
    }
}

/// Interpret a `MAX_UPLOAD_SIZE` value in megabytes.
///
/// Fractional values are truncated ("50.9" is 50). Anything that is not a
/// finite number of at least one megabyte yields [`DEFAULT_MAX_UPLOAD_MB`].
pub fn parse_upload_limit_mb(raw: &str) -> u64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 1.0 => value as u64,
        _ => DEFAULT_MAX_UPLOAD_MB,
    }
}
