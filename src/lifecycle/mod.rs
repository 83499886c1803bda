//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → watcher tasks stop → factory flushes and closes targets
//!
//! Signals (signals.rs):
//!     Ctrl-C / SIGTERM → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - A sticky watch channel; every long-running task subscribes, even
//!   after the trigger
//! - Triggering twice is harmless

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
