//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Configuration load:
//!     <logger name=... levels=... writeTo=...> elements
//!     → rule.rs (LoggingRule: matcher + levels + filters + targets)
//!     → matcher.rs (pattern compiled once)
//!
//! Logger binding (on activation or reconfigure):
//!     logger name + ordered rules
//!     → chain.rs (per-level target chains, final flags applied)
//!
//! Log call:
//!     level → chain → filter.rs verdict per rule → targets
//! ```
//!
//! # Design Decisions
//! - Rules are immutable once their configuration is activated
//! - Chains are rebuilt, never patched, when levels or rules change
//! - Matching is ordinal and case-sensitive

pub mod chain;
pub mod filter;
pub mod matcher;
pub mod rule;

pub use chain::{LevelChains, TargetChain};
pub use filter::{Filter, FilterAction, FilterChain, FilterCondition};
pub use matcher::{MatchMode, NameMatcher};
pub use rule::{DynamicLevels, LoggingRule};
