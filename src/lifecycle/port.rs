//! # Port Selection
//!
//! Binds the listening socket before the HTTP server starts. The preferred
//! port is tried first, then each following port up to the search range.
//! The bound listener is handed to the server as-is, so nothing else can
//! grab the port between the probe and the start of serving.

use crate::error::AppError;
use std::net::TcpListener;

/// Bind `host` on `preferred`, or the first free port in
/// `preferred + 1 ..= preferred + search_range`.
pub fn bind_available(host: &str, preferred: u16, search_range: u16) -> Result<TcpListener, AppError> {
    match TcpListener::bind((host, preferred)) {
        Ok(listener) => return Ok(listener),
        Err(err) => {
            tracing::warn!(
                port = preferred,
                error = %err,
                "Port {} is in use, trying to find an available port...",
                preferred
            );
        }
    }

    for offset in 1..=search_range {
        let Some(port) = preferred.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                tracing::info!(port, "Using port {} instead", port);
                return Ok(listener);
            }
            Err(err) => tracing::debug!(port, error = %err, "Port unavailable"),
        }
    }

    Err(AppError::Startup(format!(
        "No available port on {} between {} and {}",
        host,
        preferred,
        preferred.saturating_add(search_range)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupied_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_preferred_port_used_when_free() {
        let (probe, port) = occupied_port();
        drop(probe);

        let listener = bind_available("127.0.0.1", port, 10).unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[test]
    fn test_falls_back_to_later_port() {
        let (_occupied, port) = occupied_port();
        if port == u16::MAX {
            return;
        }

        let listener = bind_available("127.0.0.1", port, 100).unwrap();
        let bound = listener.local_addr().unwrap().port();
        assert!(bound > port);
        assert!(bound <= port.saturating_add(100));
    }

    #[test]
    fn test_no_range_means_startup_error() {
        let (_occupied, port) = occupied_port();

        match bind_available("127.0.0.1", port, 0) {
            Err(AppError::Startup(msg)) => assert!(msg.contains(&port.to_string())),
            other => panic!("expected startup error, got {:?}", other.map(|l| l.local_addr())),
        }
    }
}
