//! Capability registry.
//!
//! Maps type names used in configuration markup (`xsi:type='Memory'`,
//! `${message}`) to factory functions. Every `LogFactory` owns its own
//! registry, pre-populated with the builtin renderers and targets;
//! extensions are added with the `register_*` methods.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::error::Result;
use crate::event::LogEvent;
use crate::layout::parser::RendererArgs;
use crate::layout::renderers::{self, FnRenderer};
use crate::layout::{LayoutContext, Renderer};
use crate::targets::{self, TargetBuilder};

type RendererFactory = dyn Fn(&RendererArgs, &LayoutContext) -> Result<Arc<dyn Renderer>> + Send + Sync;
type TargetFactory = dyn Fn(&str) -> Box<dyn TargetBuilder> + Send + Sync;

/// A registered layout renderer: its factory plus the parameter names it
/// consumes itself. Other parameters are treated as ambient wrappers.
#[derive(Clone)]
pub struct RendererRegistration {
    factory: Arc<RendererFactory>,
    properties: Arc<[String]>,
    default_property: Option<Arc<str>>,
}

impl RendererRegistration {
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.eq_ignore_ascii_case(name))
    }

    pub fn default_property(&self) -> Option<&str> {
        self.default_property.as_deref()
    }

    pub fn create(&self, args: &RendererArgs, ctx: &LayoutContext) -> Result<Arc<dyn Renderer>> {
        (self.factory)(args, ctx)
    }
}

pub struct Registry {
    renderers: DashMap<String, RendererRegistration>,
    targets: DashMap<String, Arc<TargetFactory>>,
}

impl Registry {
    /// A registry holding every builtin renderer and target.
    pub fn new() -> Self {
        let registry = Self::empty();
        renderers::register_builtins(&registry);
        targets::register_builtins(&registry);
        registry
    }

    pub fn empty() -> Self {
        Self {
            renderers: DashMap::new(),
            targets: DashMap::new(),
        }
    }

    pub fn register_renderer<F>(
        &self,
        name: &str,
        properties: &[&str],
        default_property: Option<&str>,
        factory: F,
    ) where
        F: Fn(&RendererArgs, &LayoutContext) -> Result<Arc<dyn Renderer>> + Send + Sync + 'static,
    {
        let registration = RendererRegistration {
            factory: Arc::new(factory),
            properties: properties.iter().map(|p| p.to_string()).collect(),
            default_property: default_property.map(Arc::from),
        };
        self.renderers.insert(name.to_ascii_lowercase(), registration);
    }

    /// Register a thread-agnostic renderer computed by `render`.
    pub fn register_renderer_fn<F>(&self, name: &str, render: F)
    where
        F: Fn(&LogEvent) -> String + Send + Sync + 'static,
    {
        self.register_fallible_renderer_fn(name, move |event| Ok(render(event)));
    }

    /// Like [`Registry::register_renderer_fn`], but failures are reported
    /// to the internal logger and render as empty text.
    pub fn register_fallible_renderer_fn<F>(&self, name: &str, render: F)
    where
        F: Fn(&LogEvent) -> std::result::Result<String, String> + Send + Sync + 'static,
    {
        let render: Arc<dyn Fn(&LogEvent) -> std::result::Result<String, String> + Send + Sync> =
            Arc::new(render);
        let owned = name.to_string();
        self.register_renderer(name, &[], None, move |_, _| {
            Ok(Arc::new(FnRenderer::new(owned.clone(), true, render.clone())))
        });
    }

    pub fn register_target<F>(&self, type_name: &str, factory: F)
    where
        F: Fn(&str) -> Box<dyn TargetBuilder> + Send + Sync + 'static,
    {
        self.targets
            .insert(type_name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn renderer(&self, name: &str) -> Option<RendererRegistration> {
        self.renderers
            .get(&name.trim().to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }

    /// A fresh builder for a target of `type_name` called `name`.
    pub fn target_builder(&self, type_name: &str, name: &str) -> Option<Box<dyn TargetBuilder>> {
        let factory = self
            .targets
            .get(&type_name.trim().to_ascii_lowercase())
            .map(|entry| entry.value().clone())?;
        Some(factory(name))
    }

    /// True if `name` is a known renderer or target type.
    pub fn has_type(&self, name: &str) -> bool {
        let key = name.trim().to_ascii_lowercase();
        self.renderers.contains_key(&key) || self.targets.contains_key(&key)
    }

    pub fn target_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.targets.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("renderers", &self.renderers.len())
            .field("targets", &self.targets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::level::LogLevel;

    #[test]
    fn test_builtins_are_case_insensitive() {
        let registry = Registry::new();
        assert!(registry.renderer("Message").is_some());
        assert!(registry.renderer("LONGDATE").is_some());
        assert!(registry.target_builder("memory", "m").is_some());
        assert!(registry.target_builder("MEMORY", "m").is_some());
        assert!(registry.target_builder("NoSuchTarget", "m").is_none());
    }

    #[test]
    fn test_custom_renderer_is_usable_in_layouts() {
        let registry = Arc::new(Registry::new());
        registry.register_renderer_fn("shout", |event| event.message().to_uppercase());
        let ctx = LayoutContext::new(registry);
        let layout = Layout::compile("${shout}!", &ctx).unwrap();
        let event = LogEvent::new(LogLevel::Info, "x", "hey");
        assert_eq!(&*layout.render(&event), "HEY!");
    }

    #[test]
    fn test_empty_registry_knows_nothing() {
        let registry = Registry::empty();
        assert!(!registry.has_type("message"));
        assert!(registry.target_types().is_empty());
    }
}
