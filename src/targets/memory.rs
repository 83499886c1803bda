//! In-memory and discarding targets.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::error::{ConfigError, Result, TargetError};
use crate::event::LogEvent;
use crate::layout::Layout;
use crate::targets::{parse_flag, Target, TargetBuilder, TargetContext};

pub const DEFAULT_LAYOUT: &str = "${longdate}|${level:uppercase=true}|${logger}|${message}";

/// Keeps rendered lines in memory. Mostly useful for tests and tooling.
#[derive(Debug)]
pub struct MemoryTarget {
    name: String,
    layout: Layout,
    max_logs_count: usize,
    logs: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MemoryTarget {
    pub fn new(name: impl Into<String>, layout: Layout) -> Self {
        Self {
            name: name.into(),
            layout,
            max_logs_count: 0,
            logs: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// A memory target rendering just `${message}`.
    pub fn with_message_layout(name: impl Into<String>) -> Self {
        Self::new(name, Layout::parse("${message}").unwrap_or_else(|_| Layout::literal("")))
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().expect("memory target lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().expect("memory target lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.logs.lock().expect("memory target lock poisoned").clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Target for MemoryTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "Memory"
    }

    fn write(&self, event: &Arc<LogEvent>) -> Result<(), TargetError> {
        let line = self.layout.render(event).to_string();
        let mut logs = self.logs.lock().expect("memory target lock poisoned");
        if self.max_logs_count > 0 && logs.len() >= self.max_logs_count {
            logs.remove(0);
        }
        logs.push(line);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn precalculate(&self, event: &LogEvent) {
        self.layout.precalculate(event);
    }
}

pub(crate) struct MemoryTargetBuilder {
    name: String,
    layout: Option<Layout>,
    max_logs_count: usize,
}

impl MemoryTargetBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            layout: None,
            max_logs_count: 0,
        }
    }
}

impl TargetBuilder for MemoryTargetBuilder {
    fn set_property(&mut self, name: &str, value: &str, ctx: &TargetContext) -> Result<bool> {
        match name.to_ascii_lowercase().as_str() {
            "layout" => self.layout = Some(ctx.layout(value)?),
            "maxlogscount" => {
                self.max_logs_count = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid(name, value, "expected a count"))?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn build(self: Box<Self>, ctx: &TargetContext) -> Result<Arc<dyn Target>> {
        let layout = match self.layout {
            Some(layout) => layout,
            None => ctx.layout(DEFAULT_LAYOUT)?,
        };
        let mut target = MemoryTarget::new(self.name, layout);
        target.max_logs_count = self.max_logs_count;
        Ok(Arc::new(target))
    }
}

/// Accepts and discards events, counting them.
#[derive(Debug)]
pub struct NullTarget {
    name: String,
    layout: Option<Layout>,
    writes: AtomicUsize,
}

impl NullTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: None,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Target for NullTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "Null"
    }

    fn write(&self, event: &Arc<LogEvent>) -> Result<(), TargetError> {
        if let Some(layout) = &self.layout {
            let _ = layout.render(event);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub(crate) struct NullTargetBuilder {
    name: String,
    format_message: bool,
    layout: Option<Layout>,
}

impl NullTargetBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            format_message: false,
            layout: None,
        }
    }
}

impl TargetBuilder for NullTargetBuilder {
    fn set_property(&mut self, name: &str, value: &str, ctx: &TargetContext) -> Result<bool> {
        match name.to_ascii_lowercase().as_str() {
            "formatmessage" => self.format_message = parse_flag(name, value)?,
            "layout" => self.layout = Some(ctx.layout(value)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn build(self: Box<Self>, ctx: &TargetContext) -> Result<Arc<dyn Target>> {
        let layout = match (self.format_message, self.layout) {
            (false, _) => None,
            (true, Some(layout)) => Some(layout),
            (true, None) => Some(ctx.layout(DEFAULT_LAYOUT)?),
        };
        Ok(Arc::new(NullTarget {
            name: self.name,
            layout,
            writes: AtomicUsize::new(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LogLevel;

    fn event(message: &str) -> Arc<LogEvent> {
        Arc::new(LogEvent::new(LogLevel::Info, "test", message))
    }

    #[test]
    fn memory_target_keeps_rendered_lines() {
        let target = MemoryTarget::with_message_layout("m");
        target.write(&event("one")).unwrap();
        target.write(&event("two")).unwrap();
        assert_eq!(target.logs(), vec!["one", "two"]);
        target.clear();
        assert!(target.is_empty());
    }

    #[test]
    fn memory_target_trims_to_max_count() {
        let ctx = TargetContext::default();
        let mut builder = Box::new(MemoryTargetBuilder::new("m"));
        assert!(builder.set_property("layout", "${message}", &ctx).unwrap());
        assert!(builder.set_property("maxLogsCount", "2", &ctx).unwrap());
        assert!(!builder.set_property("color", "red", &ctx).unwrap());
        let target = builder.build(&ctx).unwrap();
        for m in ["a", "b", "c"] {
            target.write(&event(m)).unwrap();
        }
        let memory = crate::targets::downcast_target::<MemoryTarget>(&target).unwrap();
        assert_eq!(memory.logs(), vec!["b", "c"]);
    }

    #[test]
    fn null_target_counts_writes() {
        let target = NullTarget::new("n");
        target.write(&event("x")).unwrap();
        assert_eq!(target.write_count(), 1);
    }
}
