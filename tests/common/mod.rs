//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use logroute::targets::MemoryTarget;
use logroute::{LogFactory, LogFactoryOptions, LogLevel, LoggingConfiguration};

/// Write `text` to `dir/name`, replacing any existing file.
pub fn write_config(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// Factory with debug diagnostics captured and a short debounce.
pub fn factory(debounce_ms: u64) -> Arc<LogFactory> {
    factory_with(LogFactoryOptions {
        debounce_ms,
        internal_log_level: LogLevel::Debug,
        ..Default::default()
    })
}

pub fn factory_with(options: LogFactoryOptions) -> Arc<LogFactory> {
    let factory = LogFactory::new(options);
    factory.internal_logger().start_capture();
    factory
}

pub fn memory(config: &LoggingConfiguration, name: &str) -> Arc<MemoryTarget> {
    config
        .find_target::<MemoryTarget>(name)
        .unwrap_or_else(|| panic!("memory target '{}' not found", name))
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

/// `wait_until` for tests that run without a tokio runtime.
pub fn wait_until_blocking<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    check()
}

/// Target count of the active configuration.
pub fn target_count(factory: &LogFactory) -> usize {
    factory
        .configuration()
        .map(|c| c.all_targets().len())
        .unwrap_or(0)
}
