//! # Process Lifecycle
//!
//! Everything that decides when the process starts serving and when it stops.
//!
//! ## Key Components:
//! - **Lock**: only one instance per machine
//! - **Port**: preferred port with fallback to the next free one
//! - **Readiness**: poll the server, then open the browser
//! - **Heartbeat**: exit once the page stops checking in
//! - **Terminate**: delayed, observable process exit

pub mod heartbeat;
pub mod lock;
pub mod port;
pub mod readiness;
pub mod terminate;

pub use lock::InstanceLock;
pub use port::bind_available;
pub use readiness::spawn_browser_opener;
pub use terminate::ProcessTerminator;
