//! Log events.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::level::LogLevel;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// A single log event flowing through the routing table.
///
/// Events are shared as `Arc<LogEvent>` so that wrapper targets can hand them
/// to a background worker. Layout results computed for an event are memoised
/// in a per-event cache keyed by layout id.
#[derive(Debug)]
pub struct LogEvent {
    id: u64,
    level: LogLevel,
    logger_name: String,
    message: String,
    properties: BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
    layout_cache: Mutex<HashMap<u64, Arc<str>>>,
}

impl LogEvent {
    pub fn new(level: LogLevel, logger_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            level,
            logger_name: logger_name.into(),
            message: message.into(),
            properties: BTreeMap::new(),
            timestamp: Utc::now(),
            layout_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Event used to evaluate layouts outside of a log call (static
    /// renderers, level expressions, variables).
    pub fn null() -> Self {
        Self::new(LogLevel::Off, "", "")
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn logger_name(&self) -> &str {
        &self.logger_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub(crate) fn cached_layout_value(&self, layout_id: u64) -> Option<Arc<str>> {
        self.layout_cache
            .lock()
            .expect("layout cache lock poisoned")
            .get(&layout_id)
            .cloned()
    }

    /// Store a rendered value, returning whichever value won if another
    /// thread stored one first.
    pub(crate) fn store_layout_value(&self, layout_id: u64, value: Arc<str>) -> Arc<str> {
        self.layout_cache
            .lock()
            .expect("layout cache lock poisoned")
            .entry(layout_id)
            .or_insert(value)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_get_distinct_ids() {
        let a = LogEvent::new(LogLevel::Info, "A", "one");
        let b = LogEvent::new(LogLevel::Info, "A", "one");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn first_stored_layout_value_wins() {
        let event = LogEvent::null();
        let first = event.store_layout_value(7, Arc::from("first"));
        let second = event.store_layout_value(7, Arc::from("second"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(&*second, "first");
    }
}
