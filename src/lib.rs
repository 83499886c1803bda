//! logroute: hot-reloadable log routing configuration.
//!
//! A `LogFactory` owns one active `LoggingConfiguration`: targets, rules
//! and variables parsed from an XML document (or assembled in code).
//! Loggers resolve per-level target chains from the active rules; layouts
//! render each event for its targets. File changes are debounced and
//! reloaded into a fresh snapshot that is swapped in atomically.

pub mod config;
pub mod event;
pub mod factory;
pub mod layout;
pub mod level;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod targets;

pub use config::{
    ConfigError, ConfigSource, LogFactoryOptions, LoggingConfiguration, Registry, ServiceRepository,
};
pub use event::LogEvent;
pub use factory::{ConfigEvent, LogFactory, Logger, ObserverId};
pub use layout::{Layout, LayoutContext};
pub use level::LogLevel;
pub use lifecycle::Shutdown;
pub use routing::{LoggingRule, NameMatcher};
pub use targets::{Target, TargetBuilder};
