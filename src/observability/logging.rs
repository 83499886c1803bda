//! Process logging for the `logroute` binary.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Honour `RUST_LOG`, falling back to a crate-level default

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "logroute=info";

/// Install the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
