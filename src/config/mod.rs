//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! config file / text
//!     → loader.rs (read, expand includes, collect watched files)
//!     → xml.rs (element tree + duplicate attributes)
//!     → parser.rs (variables, targets, rules)
//!     → LoggingConfiguration (immutable routing, live variables)
//!     → LogFactory swaps it in atomically
//!
//! On file change:
//!     watcher.rs debounces notify events
//!     → LoggingConfiguration::reload
//!     → LogFactory::set_configuration (old targets closed after the swap)
//! ```
//!
//! # Design Decisions
//! - A failed reload leaves the active snapshot untouched
//! - Type lookup goes through `Registry`; nothing is constructed by
//!   reflection
//! - Strictness comes from `throwConfigExceptions`, then
//!   `throwExceptions`, then the factory options

pub mod configuration;
pub mod error;
pub mod loader;
pub(crate) mod parser;
pub mod registry;
pub mod services;
pub mod settings;
pub mod variables;
pub mod watcher;
pub mod xml;

pub use configuration::{ConfigEnvironment, ConfigSource, LoggingConfiguration};
pub use error::{ConfigError, LogError, RenderError, TargetError};
pub use loader::WatchedFile;
pub use registry::Registry;
pub use services::ServiceRepository;
pub use settings::{ConfigSettings, LogFactoryOptions};
pub use variables::{Variable, VariableMap};
pub use watcher::ConfigWatcher;
