//! Target writing through a service resolved from the repository.
//!
//! The sink is resolved lazily on first write. While it cannot be
//! resolved, events are dropped and resolution is retried on the next
//! write.

use std::sync::{Arc, Mutex};

use crate::config::error::{ConfigError, Result, TargetError};
use crate::config::services::ServiceRepository;
use crate::event::LogEvent;
use crate::layout::Layout;
use crate::observability::internal::InternalLogger;
use crate::targets::memory::DEFAULT_LAYOUT;
use crate::targets::{Target, TargetBuilder, TargetContext};

/// Destination for rendered lines, registered as a service.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);

    fn flush(&self) {}
}

impl std::fmt::Debug for dyn LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogSink")
    }
}

/// Register `sink` so `Service` targets can find it under `name`.
pub fn register_sink(services: &ServiceRepository, name: &str, sink: Arc<dyn LogSink>) {
    services.register_instance(name, Arc::new(sink));
}

#[derive(Debug)]
pub struct ServiceTarget {
    name: String,
    service: String,
    layout: Layout,
    services: Arc<ServiceRepository>,
    internal: Option<Arc<InternalLogger>>,
    sink: Mutex<Option<Arc<dyn LogSink>>>,
}

impl ServiceTarget {
    fn sink(&self) -> Option<Arc<dyn LogSink>> {
        let mut slot = self.sink.lock().expect("service sink lock poisoned");
        if let Some(sink) = slot.as_ref() {
            return Some(sink.clone());
        }
        match self.services.resolve_as::<Arc<dyn LogSink>>(&self.service) {
            Ok(sink) => {
                let sink = Arc::clone(&*sink);
                *slot = Some(sink.clone());
                Some(sink)
            }
            Err(e) => {
                let message = format!(
                    "{} target '{}' cannot resolve service '{}', dropping event: {}",
                    self.type_name(),
                    self.name,
                    self.service,
                    e
                );
                match &self.internal {
                    Some(internal) => internal.debug(message),
                    None => tracing::debug!("{}", message),
                }
                None
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sink.lock().expect("service sink lock poisoned").is_some()
    }
}

impl Target for ServiceTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "Service"
    }

    fn write(&self, event: &Arc<LogEvent>) -> Result<(), TargetError> {
        if let Some(sink) = self.sink() {
            sink.write_line(&self.layout.render(event));
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), TargetError> {
        if let Some(sink) = self.sink.lock().expect("service sink lock poisoned").as_ref() {
            sink.flush();
        }
        Ok(())
    }

    fn precalculate(&self, event: &LogEvent) {
        self.layout.precalculate(event);
    }
}

pub(crate) struct ServiceTargetBuilder {
    name: String,
    service: Option<String>,
    layout: Option<Layout>,
}

impl ServiceTargetBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            service: None,
            layout: None,
        }
    }
}

impl TargetBuilder for ServiceTargetBuilder {
    fn set_property(&mut self, name: &str, value: &str, ctx: &TargetContext) -> Result<bool> {
        match name.to_ascii_lowercase().as_str() {
            "service" => self.service = Some(value.to_string()),
            "layout" => self.layout = Some(ctx.layout(value)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn build(self: Box<Self>, ctx: &TargetContext) -> Result<Arc<dyn Target>> {
        let service = self
            .service
            .ok_or_else(|| ConfigError::missing("target", "service"))?;
        let layout = match self.layout {
            Some(layout) => layout,
            None => ctx.layout(DEFAULT_LAYOUT)?,
        };
        Ok(Arc::new(ServiceTarget {
            name: self.name,
            service,
            layout,
            services: ctx.services.clone(),
            internal: ctx.layout.internal().cloned(),
            sink: Mutex::new(None),
        }))
    }
}
