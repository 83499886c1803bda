//! Configuration-wide settings and factory options.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::config::error::{ConfigError, Result};
use crate::layout::TimeSource;
use crate::level::LogLevel;
use crate::observability::internal::InternalLogSettings;

/// Settings read from the root element of a configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSettings {
    pub auto_reload: bool,
    pub keep_variables_on_reload: bool,
    pub throw_exceptions: Option<bool>,
    pub throw_config_exceptions: Option<bool>,
    pub use_invariant_culture: bool,
    pub global_threshold: LogLevel,
    pub time_source: TimeSource,
    pub internal_log: InternalLogSettings,
}

impl Default for ConfigSettings {
    fn default() -> Self {
        Self {
            auto_reload: false,
            keep_variables_on_reload: false,
            throw_exceptions: None,
            throw_config_exceptions: None,
            use_invariant_culture: false,
            global_threshold: LogLevel::Trace,
            time_source: TimeSource::Local,
            internal_log: InternalLogSettings::default(),
        }
    }
}

impl ConfigSettings {
    /// `throwConfigExceptions` falls back to `throwExceptions`, then to
    /// the factory option.
    pub fn throw_config_exceptions_or(&self, fallback: bool) -> bool {
        self.throw_config_exceptions
            .or(self.throw_exceptions)
            .unwrap_or(fallback)
    }

    pub fn throw_exceptions_or(&self, fallback: bool) -> bool {
        self.throw_exceptions.unwrap_or(fallback)
    }
}

/// Options for a `LogFactory`, usually loaded from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogFactoryOptions {
    /// Quiet period after the last file change before reloading.
    pub debounce_ms: u64,
    pub throw_exceptions: bool,
    pub throw_config_exceptions: bool,
    pub keep_variables_on_reload: bool,
    pub internal_log_level: LogLevel,
}

impl Default for LogFactoryOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            throw_exceptions: false,
            throw_config_exceptions: false,
            keep_variables_on_reload: false,
            internal_log_level: LogLevel::Off,
        }
    }
}

impl LogFactoryOptions {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ConfigError::invalid("options", "toml", e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
    }
}
