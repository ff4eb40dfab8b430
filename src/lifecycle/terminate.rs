//! Process termination.
//!
//! Idle shutdown and the Quit button both end the process through a
//! [`Terminator`] so tests can observe the request without exiting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No heartbeat within the idle timeout.
    IdleTimeout,
    /// The user asked via `POST /shutdown`.
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::IdleTimeout => f.write_str("idle timeout"),
            ShutdownReason::Requested => f.write_str("shutdown requested"),
        }
    }
}

pub trait Terminator: Send + Sync {
    fn terminate(&self, reason: ShutdownReason);
}

/// Exits the process with status 0. Destructors do not run; the OS
/// releases the instance lock.
#[derive(Debug, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, reason: ShutdownReason) {
        tracing::info!(%reason, "Terminating WhisperTrans");
        std::process::exit(0);
    }
}

/// Terminate after `delay`, giving the current response time to reach the client.
pub fn schedule_termination(
    terminator: Arc<dyn Terminator>,
    delay: Duration,
    reason: ShutdownReason,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        terminator.terminate(reason);
    })
}
