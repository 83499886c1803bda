//! Log targets.
//!
//! # Responsibilities
//! - Define the `Target` contract: accept an event, flush, close
//! - Define `TargetBuilder`, the property-by-name construction surface
//!   used by the configuration parser
//! - Register the builtin target types
//!
//! # Design Decisions
//! - Targets are shared as `Arc<dyn Target>`; the same instance may be
//!   referenced by several rules and wrappers
//! - Wrapper and compound targets expose their children so unused-target
//!   checks can walk the graph

pub mod console;
pub mod memory;
pub mod service;
pub mod wrappers;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::config::error::{ConfigError, Result, TargetError};
use crate::config::registry::Registry;
use crate::config::services::ServiceRepository;
use crate::event::LogEvent;
use crate::layout::{compile_or_literal, Layout, LayoutContext};

pub use console::ConsoleTarget;
pub use memory::{MemoryTarget, NullTarget};
pub use service::{LogSink, ServiceTarget};
pub use wrappers::{AsyncTargetWrapper, AutoFlushTargetWrapper, SplitGroupTarget};

/// Upcast helper so `Arc<dyn Target>` can be downcast to a concrete type.
pub trait AsAny: Any + Send + Sync {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub trait Target: AsAny + fmt::Debug {
    fn name(&self) -> &str;

    fn type_name(&self) -> &str;

    /// Called by the factory before the owning configuration goes live.
    fn initialize(&self) -> Result<(), TargetError> {
        Ok(())
    }

    fn write(&self, event: &Arc<LogEvent>) -> Result<(), TargetError>;

    fn flush(&self) -> Result<(), TargetError> {
        Ok(())
    }

    /// Called once the owning configuration is retired.
    fn close(&self) {}

    /// Targets this one forwards to.
    fn wrapped_targets(&self) -> Vec<Arc<dyn Target>> {
        Vec::new()
    }

    /// Render thread-bound layouts before the event changes thread.
    fn precalculate(&self, _event: &LogEvent) {}
}

/// Downcast a shared target to its concrete type.
pub fn downcast_target<T: Target>(target: &Arc<dyn Target>) -> Option<Arc<T>> {
    target.clone().as_any_arc().downcast::<T>().ok()
}

/// Services available while targets are being built.
#[derive(Clone, Debug)]
pub struct TargetContext {
    pub layout: LayoutContext,
    pub services: Arc<ServiceRepository>,
}

impl TargetContext {
    pub fn new(layout: LayoutContext, services: Arc<ServiceRepository>) -> Self {
        Self { layout, services }
    }

    /// Compile a layout-valued property.
    pub fn layout(&self, text: &str) -> Result<Layout> {
        compile_or_literal(text, &self.layout)
    }
}

impl Default for TargetContext {
    fn default() -> Self {
        Self::new(LayoutContext::default(), Arc::new(ServiceRepository::new()))
    }
}

/// Builds a target from named properties.
pub trait TargetBuilder: Send {
    /// Apply one property. `Ok(false)` means the property is unknown.
    fn set_property(&mut self, name: &str, value: &str, ctx: &TargetContext) -> Result<bool>;

    /// True for wrapper and compound targets.
    fn accepts_targets(&self) -> bool {
        false
    }

    fn add_target(&mut self, target: Arc<dyn Target>) -> Result<()> {
        Err(ConfigError::invalid(
            "target",
            target.name(),
            "this target type does not wrap other targets",
        ))
    }

    fn build(self: Box<Self>, ctx: &TargetContext) -> Result<Arc<dyn Target>>;
}

pub(crate) fn parse_flag(name: &str, value: &str) -> Result<bool> {
    crate::layout::parser::parse_bool(name, value)
}

pub(crate) fn register_builtins(registry: &Registry) {
    registry.register_target("Memory", |name| Box::new(memory::MemoryTargetBuilder::new(name)));
    registry.register_target("Null", |name| Box::new(memory::NullTargetBuilder::new(name)));
    registry.register_target("Console", |name| {
        Box::new(console::ConsoleTargetBuilder::new(name))
    });
    registry.register_target("Service", |name| {
        Box::new(service::ServiceTargetBuilder::new(name))
    });
    registry.register_target("SplitGroup", |name| {
        Box::new(wrappers::SplitGroupBuilder::new(name))
    });
    registry.register_target("AutoFlushWrapper", |name| {
        Box::new(wrappers::AutoFlushBuilder::new(name))
    });
    registry.register_target("AsyncWrapper", |name| {
        Box::new(wrappers::AsyncWrapperBuilder::new(name))
    });
}
