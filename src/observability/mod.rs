//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! config parsing / reload / target failures
//!     → internal.rs (per-factory diagnostic channel, capturable in tests)
//!     → forwarded to tracing under target "logroute::internal"
//!
//! factory swaps and watcher reloads
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! binary
//!     → logging.rs (tracing-subscriber with EnvFilter)
//! ```
//!
//! # Design Decisions
//! - The diagnostic channel is separate from the routing pipeline so a
//!   broken configuration can still report why it is broken
//! - Metrics go through the `metrics` facade; with no recorder installed
//!   they are no-ops

pub mod internal;
pub mod logging;
pub mod metrics;

pub use internal::{InternalLogSettings, InternalLogger};
