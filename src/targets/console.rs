//! Standard output / standard error target.

use std::io::Write;
use std::sync::Arc;

use crate::config::error::{Result, TargetError};
use crate::event::LogEvent;
use crate::layout::Layout;
use crate::targets::memory::DEFAULT_LAYOUT;
use crate::targets::{parse_flag, Target, TargetBuilder, TargetContext};

#[derive(Debug)]
pub struct ConsoleTarget {
    name: String,
    layout: Layout,
    error: bool,
}

impl ConsoleTarget {
    pub fn new(name: impl Into<String>, layout: Layout) -> Self {
        Self {
            name: name.into(),
            layout,
            error: false,
        }
    }

    /// Write to standard error instead of standard output.
    pub fn to_stderr(mut self) -> Self {
        self.error = true;
        self
    }
}

impl Target for ConsoleTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "Console"
    }

    fn write(&self, event: &Arc<LogEvent>) -> Result<(), TargetError> {
        let line = self.layout.render(event);
        if self.error {
            writeln!(std::io::stderr().lock(), "{}", line)?;
        } else {
            writeln!(std::io::stdout().lock(), "{}", line)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), TargetError> {
        if self.error {
            std::io::stderr().flush()?;
        } else {
            std::io::stdout().flush()?;
        }
        Ok(())
    }

    fn precalculate(&self, event: &LogEvent) {
        self.layout.precalculate(event);
    }
}

pub(crate) struct ConsoleTargetBuilder {
    name: String,
    layout: Option<Layout>,
    error: bool,
}

impl ConsoleTargetBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            layout: None,
            error: false,
        }
    }
}

impl TargetBuilder for ConsoleTargetBuilder {
    fn set_property(&mut self, name: &str, value: &str, ctx: &TargetContext) -> Result<bool> {
        match name.to_ascii_lowercase().as_str() {
            "layout" => self.layout = Some(ctx.layout(value)?),
            "error" | "stderr" => self.error = parse_flag(name, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn build(self: Box<Self>, ctx: &TargetContext) -> Result<Arc<dyn Target>> {
        let layout = match self.layout {
            Some(layout) => layout,
            None => ctx.layout(DEFAULT_LAYOUT)?,
        };
        Ok(Arc::new(ConsoleTarget {
            name: self.name,
            layout,
            error: self.error,
        }))
    }
}
