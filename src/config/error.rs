//! Error types for configuration, rendering, targets and log calls.

use std::path::PathBuf;

use crate::level::LogLevel;

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// A configuration problem: malformed markup, unknown type references,
/// unresolvable includes and the like.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed configuration markup: {0}")]
    Xml(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown {kind} type '{name}'")]
    UnknownType { kind: &'static str, name: String },

    #[error("unknown layout renderer '{0}'")]
    UnknownRenderer(String),

    #[error("element '{element}' is missing required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    #[error("duplicate attribute '{attribute}' on element '{element}'")]
    DuplicateAttribute { element: String, attribute: String },

    #[error("target '{0}' not found")]
    TargetNotFound(String),

    #[error("included file not found: {}", .0.display())]
    IncludeNotFound(PathBuf),

    #[error("error in included file {}: {source}", .path.display())]
    Include {
        path: PathBuf,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("invalid value '{value}' for '{property}': {reason}")]
    InvalidValue {
        property: String,
        value: String,
        reason: String,
    },

    #[error("dependency cycle detected while resolving '{name}' ({})", .chain.join(" -> "))]
    DependencyCycle { name: String, chain: Vec<String> },

    #[error("unresolved dependency '{0}'")]
    UnresolvedDependency(String),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to load configuration from {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    pub(crate) fn invalid(property: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            property: property.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(element: &str, attribute: &str) -> Self {
        ConfigError::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Strip `Load`/`Include` wrappers.
    pub fn root_cause(&self) -> &ConfigError {
        match self {
            ConfigError::Load { source, .. } | ConfigError::Include { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

/// A layout renderer failed while formatting one event.
#[derive(Debug, Clone, thiserror::Error)]
#[error("layout renderer '{renderer}' failed: {message}")]
pub struct RenderError {
    pub renderer: String,
    pub message: String,
}

impl RenderError {
    pub fn new(renderer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            renderer: renderer.into(),
            message: message.into(),
        }
    }
}

/// A target could not be initialized or could not accept an event.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("target '{target}' failed to initialize: {message}")]
    Initialize { target: String, message: String },

    #[error("target '{target}' failed to write: {message}")]
    Write { target: String, message: String },

    #[error("target '{0}' is closed")]
    Closed(String),

    #[error("target I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Returned by `Logger::try_log` when exceptions are not suppressed.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to write {level} event for logger '{logger}': {source}")]
    Target {
        logger: String,
        level: LogLevel,
        #[source]
        source: TargetError,
    },
}
