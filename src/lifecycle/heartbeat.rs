//! # Heartbeat Monitor
//!
//! The page posts `/heartbeat` while it is open. Once at least one heartbeat
//! has arrived, going longer than the idle timeout without another one ends
//! the process. Before the first heartbeat the monitor never fires, so a
//! server started without a browser stays up.
//!
//! Times come from `tokio::time::Instant`, which the tests pause and advance.

use crate::lifecycle::terminate::{ShutdownReason, Terminator};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Time of the most recent heartbeat, shared between the endpoint and the monitor.
#[derive(Debug, Default)]
pub struct Heartbeat {
    last: Mutex<Option<Instant>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn last_seen(&self) -> Option<Instant> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the last heartbeat; `None` before the first one.
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_seen().map(|last| last.elapsed())
    }

    /// True once a heartbeat was seen and the silence since exceeds `timeout`.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for().is_some_and(|idle| idle > timeout)
    }
}

/// Start the background monitor. It checks every `interval` and calls the
/// terminator at most once.
pub fn spawn_monitor(
    heartbeat: Arc<Heartbeat>,
    interval: Duration,
    timeout: Duration,
    terminator: Arc<dyn Terminator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            timeout_secs = timeout.as_secs(),
            "Heartbeat monitor started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(idle) = heartbeat.idle_for() else {
                continue;
            };

            tracing::debug!("Last heartbeat {:.1}s ago", idle.as_secs_f64());
            if heartbeat.is_expired(timeout) {
                tracing::warn!(
                    "No heartbeat for {:.0}s, browser appears closed. Shutting down...",
                    idle.as_secs_f64()
                );
                terminator.terminate(ShutdownReason::IdleTimeout);
                break;
            }
        }
    })
}
