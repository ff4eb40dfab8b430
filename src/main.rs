//! # WhisperTrans - Main Application Entry Point
//!
//! A local web app that turns uploaded audio into text, SRT or WebVTT with
//! Whisper models running on this machine.
//!
//! ## Startup Sequence:
//! 1. **Configuration**: `.env`, `config.toml` and environment variables
//! 2. **Single instance**: take the lock file or exit with status 1
//! 3. **Port**: bind the preferred port or the next free one
//! 4. **State**: model cache, result cache, flash store and heartbeat
//! 5. **Serve**: start actix-web on the bound listener
//! 6. **Browser**: once the server answers, open the page
//!
//! ## Shutdown Paths:
//! - Ctrl+C / SIGTERM stop the server gracefully and release the lock
//! - `POST /shutdown` and the idle monitor exit the process directly
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, TOML file, environment)
//! - **state**: shared caches and lifecycle handles
//! - **transcription**: model loading, decoding and output formats
//! - **audio**: WAV decoding and resampling
//! - **lifecycle**: lock, port, readiness, heartbeat and termination
//! - **handlers**: HTTP endpoints
//! - **middleware**: request logging
//! - **error**: error types and HTTP error responses

mod audio;
mod config;
mod device;
mod error;
mod flash;
mod handlers;
mod health;
mod lifecycle;
mod middleware;
mod page;
mod results;
mod state;
mod transcription;

#[cfg(test)]
mod testing;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use lifecycle::{InstanceLock, ProcessTerminator};
use state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperLoader;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let mut config = AppConfig::load()?;
    config.validate()?;

    info!("Starting WhisperTrans v{}", env!("CARGO_PKG_VERSION"));
    if config.uses_placeholder_secret() {
        warn!("SECRET_KEY is not set; using an insecure placeholder to sign cookies");
    }

    // Held until main returns; dropping it removes the lock file.
    let _lock = match InstanceLock::acquire(&config.lifecycle.lock_file) {
        Ok(lock) => lock,
        Err(err) => {
            error!("{}", err);
            error!("Only one copy of WhisperTrans can run at a time");
            return Err(error::AppError::from(err).into());
        }
    };

    let listener = lifecycle::bind_available(
        &config.server.host,
        config.server.port,
        config.server.port_search_range,
    )?;
    let bound = listener.local_addr().context("Failed to read bound address")?;
    config.server.port = bound.port();

    let url = format!("http://{}:{}/", browser_host(&config.server.host), bound.port());
    info!(
        host = %config.server.host,
        port = bound.port(),
        max_upload_mb = config.server.max_upload_size_mb,
        device = %config.models.device,
        "Configuration loaded"
    );

    let loader = Arc::new(WhisperLoader::from_config(&config.models));
    let readiness_timeout = config.lifecycle.readiness_timeout();
    let open_browser = config.lifecycle.open_browser;
    let app_state = AppState::new(config, loader, Arc::new(ProcessTerminator));
    app_state.spawn_heartbeat_monitor();

    let data = web::Data::new(app_state);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .listen(listener)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    lifecycle::spawn_browser_opener(url, readiness_timeout, open_browser);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutting down WhisperTrans...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Set up `tracing` output. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_trans=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// A wildcard bind address is not something a browser can open.
fn browser_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        other => other,
    }
}

/// Resolve on Ctrl+C, or on SIGTERM where signals exist.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_host_maps_wildcards_to_loopback() {
        assert_eq!(browser_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(browser_host("::"), "127.0.0.1");
        assert_eq!(browser_host("127.0.0.1"), "127.0.0.1");
        assert_eq!(browser_host("localhost"), "localhost");
    }
}
