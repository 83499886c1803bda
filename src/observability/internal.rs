//! Internal diagnostic channel.
//!
//! # Responsibilities
//! - Record configuration warnings and errors (duplicate attributes,
//!   unused targets, failed reloads, renderer failures)
//! - Apply the `internalLog*` settings of the active configuration
//! - Keep an optional in-memory capture so callers can inspect output
//!
//! # Design Decisions
//! - One instance per `LogFactory`; nothing here is process-global
//! - Separate from the routing pipeline so a broken configuration can
//!   still report why it is broken
//! - Every accepted line is mirrored to `tracing` under the
//!   `logroute::internal` target

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Local;

use crate::level::LogLevel;

/// Settings read from the `internalLog*` root attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalLogSettings {
    pub level: Option<LogLevel>,
    pub file: Option<PathBuf>,
    pub to_console: Option<bool>,
    pub to_console_error: Option<bool>,
    pub include_timestamp: Option<bool>,
}

/// A leveled text sink for diagnostics about the logging system itself.
pub struct InternalLogger {
    level: AtomicUsize,
    to_console: AtomicBool,
    to_console_error: AtomicBool,
    include_timestamp: AtomicBool,
    file: Mutex<Option<(PathBuf, File)>>,
    capture: Mutex<Option<Vec<String>>>,
}

impl InternalLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level: AtomicUsize::new(level.ordinal()),
            to_console: AtomicBool::new(false),
            to_console_error: AtomicBool::new(false),
            include_timestamp: AtomicBool::new(false),
            file: Mutex::new(None),
            capture: Mutex::new(None),
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_ordinal(self.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level.ordinal(), Ordering::Relaxed);
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level >= self.level()
    }

    /// Apply the settings that are present; absent ones keep their value.
    pub fn configure(&self, settings: &InternalLogSettings) {
        if let Some(level) = settings.level {
            self.set_level(level);
        }
        if let Some(on) = settings.to_console {
            self.to_console.store(on, Ordering::Relaxed);
        }
        if let Some(on) = settings.to_console_error {
            self.to_console_error.store(on, Ordering::Relaxed);
        }
        if let Some(on) = settings.include_timestamp {
            self.include_timestamp.store(on, Ordering::Relaxed);
        }
        if let Some(path) = &settings.file {
            self.set_file(path);
        }
    }

    fn set_file(&self, path: &Path) {
        let mut slot = self.file.lock().expect("internal log file lock poisoned");
        if matches!(&*slot, Some((current, _)) if current == path) {
            return;
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => *slot = Some((path.to_path_buf(), file)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot open internal log file");
            }
        }
    }

    /// Start keeping accepted lines in memory, discarding earlier captures.
    pub fn start_capture(&self) {
        *self.capture.lock().expect("internal capture lock poisoned") = Some(Vec::new());
    }

    pub fn captured(&self) -> Vec<String> {
        self.capture
            .lock()
            .expect("internal capture lock poisoned")
            .clone()
            .unwrap_or_default()
    }

    /// Captured lines joined with newlines.
    pub fn captured_text(&self) -> String {
        self.captured().join("\n")
    }

    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        if !self.is_enabled(level) {
            return;
        }

        let message = message.to_string();
        forward_to_tracing(level, &message);

        let line = if self.include_timestamp.load(Ordering::Relaxed) {
            format!(
                "{} {} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.4f"),
                level,
                message
            )
        } else {
            format!("{} {}", level, message)
        };

        if self.to_console.load(Ordering::Relaxed) {
            println!("{}", line);
        }
        if self.to_console_error.load(Ordering::Relaxed) {
            eprintln!("{}", line);
        }
        if let Some((_, file)) = self
            .file
            .lock()
            .expect("internal log file lock poisoned")
            .as_mut()
        {
            let _ = writeln!(file, "{}", line);
        }
        if let Some(buffer) = self
            .capture
            .lock()
            .expect("internal capture lock poisoned")
            .as_mut()
        {
            buffer.push(line);
        }
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }
}

impl Default for InternalLogger {
    fn default() -> Self {
        Self::new(LogLevel::Off)
    }
}

impl fmt::Debug for InternalLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalLogger")
            .field("level", &self.level())
            .finish_non_exhaustive()
    }
}

fn forward_to_tracing(level: LogLevel, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target: "logroute::internal", "{}", message),
        LogLevel::Debug => tracing::debug!(target: "logroute::internal", "{}", message),
        LogLevel::Info => tracing::info!(target: "logroute::internal", "{}", message),
        LogLevel::Warn => tracing::warn!(target: "logroute::internal", "{}", message),
        LogLevel::Error | LogLevel::Fatal => {
            tracing::error!(target: "logroute::internal", "{}", message)
        }
        LogLevel::Off => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_below_level_are_dropped() {
        let internal = InternalLogger::new(LogLevel::Warn);
        internal.start_capture();
        internal.info("hidden");
        internal.warn("shown");
        assert_eq!(internal.captured(), vec!["Warn shown".to_string()]);
    }

    #[test]
    fn off_disables_everything() {
        let internal = InternalLogger::default();
        internal.start_capture();
        internal.error("nope");
        assert!(internal.captured().is_empty());
    }

    #[test]
    fn configure_keeps_unset_fields() {
        let internal = InternalLogger::new(LogLevel::Info);
        internal.configure(&InternalLogSettings {
            include_timestamp: Some(false),
            ..Default::default()
        });
        assert_eq!(internal.level(), LogLevel::Info);
    }

    #[test]
    fn file_output_appends_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("internal.log");
        let internal = InternalLogger::new(LogLevel::Debug);
        internal.configure(&InternalLogSettings {
            file: Some(path.clone()),
            ..Default::default()
        });
        internal.debug("one");
        internal.error("two");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Debug one\nError two\n");
    }
}
