//! Layout renderer graphs.
//!
//! # Data Flow
//! ```text
//! template text "${date} [${level:uppercase=true}] ${message}"
//!     → parser.rs (tokenize, nested placeholders, escapes)
//!     → registry lookup per renderer name
//!     → wrappers.rs (ambient parameters become wrapper renderers)
//!     → static renderers folded into literal nodes
//!     → Layout (immutable, shared via Arc)
//!
//! Per event:
//!     Layout::render(event)
//!     → per-event cache hit? return the same Arc<str>
//!     → otherwise append every node, isolating renderer failures
//! ```
//!
//! # Design Decisions
//! - A layout is compiled once and never mutated afterwards
//! - Thread-affinity is computed over the whole tree: one non-agnostic
//!   renderer taints the layout
//! - Renderer failures blank only that renderer's contribution

pub mod parser;
pub mod renderers;
pub mod wrappers;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::error::{ConfigError, RenderError, Result};
use crate::config::registry::Registry;
use crate::config::variables::VariableMap;
use crate::event::LogEvent;
use crate::level::LogLevel;
use crate::observability::internal::InternalLogger;

static NEXT_LAYOUT_ID: AtomicU64 = AtomicU64::new(1);

/// A typed value exposed by a renderer, bypassing text conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Level(LogLevel),
    Timestamp(DateTime<Utc>),
    Text(Arc<str>),
}

/// Clock used by the date renderers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSource {
    #[default]
    Local,
    Utc,
}

/// A node of the renderer graph.
pub trait Renderer: Send + Sync + fmt::Debug {
    /// Registered name, used in diagnostics.
    fn name(&self) -> &str;

    /// Append this renderer's output for `event`.
    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError>;

    /// Output does not depend on the event and can be folded at compile time.
    fn is_static(&self) -> bool {
        false
    }

    /// Safe to evaluate on a thread other than the one that logged.
    fn is_thread_agnostic(&self) -> bool {
        true
    }

    /// Results are cached per event and must keep reference identity.
    fn is_caching(&self) -> bool {
        false
    }

    fn raw_value(&self, _event: &LogEvent) -> Option<RawValue> {
        None
    }

    /// The wrapped layout, for wrapper renderers.
    fn inner(&self) -> Option<&Layout> {
        None
    }
}

/// Everything a template needs while being compiled.
#[derive(Clone)]
pub struct LayoutContext {
    registry: Arc<Registry>,
    variables: Weak<VariableMap>,
    time_source: TimeSource,
    strict: bool,
    internal: Option<Arc<InternalLogger>>,
}

impl LayoutContext {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            variables: Weak::new(),
            time_source: TimeSource::default(),
            strict: false,
            internal: None,
        }
    }

    pub fn with_variables(mut self, variables: &Arc<VariableMap>) -> Self {
        self.variables = Arc::downgrade(variables);
        self
    }

    pub fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_internal(mut self, internal: Arc<InternalLogger>) -> Self {
        self.internal = Some(internal);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn variables(&self) -> Weak<VariableMap> {
        self.variables.clone()
    }

    pub fn time_source(&self) -> TimeSource {
        self.time_source
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn internal(&self) -> Option<&Arc<InternalLogger>> {
        self.internal.as_ref()
    }

    pub(crate) fn warn(&self, message: impl fmt::Display) {
        match &self.internal {
            Some(internal) => internal.warn(message),
            None => tracing::warn!("{}", message),
        }
    }
}

impl Default for LayoutContext {
    fn default() -> Self {
        Self::new(Arc::new(Registry::new()))
    }
}

impl fmt::Debug for LayoutContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutContext")
            .field("time_source", &self.time_source)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Literal { text: String, raw: Option<RawValue> },
    Renderer(Arc<dyn Renderer>),
}

#[derive(Debug)]
struct CompiledLayout {
    id: u64,
    text: String,
    nodes: Vec<Node>,
    thread_agnostic: bool,
    has_cache: bool,
    internal: Option<Arc<InternalLogger>>,
}

/// A compiled template. Cloning is cheap and shares the graph.
#[derive(Debug, Clone)]
pub struct Layout(Arc<CompiledLayout>);

impl Layout {
    /// Compile `text` with builtin renderers only.
    pub fn parse(text: &str) -> Result<Layout> {
        Self::compile(text, &LayoutContext::default())
    }

    pub fn compile(text: &str, ctx: &LayoutContext) -> Result<Layout> {
        let nodes = parser::compile_nodes(text, ctx)?;
        Ok(Self::from_nodes(text.to_string(), nodes, ctx.internal.clone()))
    }

    /// A layout that always renders `text` verbatim.
    pub fn literal(text: impl Into<String>) -> Layout {
        let text = text.into();
        let nodes = if text.is_empty() {
            Vec::new()
        } else {
            vec![Node::Literal {
                text: text.clone(),
                raw: None,
            }]
        };
        Self::from_nodes(text, nodes, None)
    }

    /// Wrap a single renderer, as ambient wrappers do.
    pub(crate) fn from_renderer(
        renderer: Arc<dyn Renderer>,
        internal: Option<Arc<InternalLogger>>,
    ) -> Layout {
        let text = format!("${{{}}}", renderer.name());
        Self::from_nodes(text, vec![Node::Renderer(renderer)], internal)
    }

    pub(crate) fn from_nodes(
        text: String,
        nodes: Vec<Node>,
        internal: Option<Arc<InternalLogger>>,
    ) -> Layout {
        let thread_agnostic = nodes.iter().all(|node| match node {
            Node::Literal { .. } => true,
            Node::Renderer(r) => r.is_thread_agnostic(),
        });
        let has_cache = nodes.iter().any(|node| match node {
            Node::Literal { .. } => false,
            Node::Renderer(r) => r.is_caching() || r.inner().is_some_and(Layout::has_cache),
        });
        Layout(Arc::new(CompiledLayout {
            id: NEXT_LAYOUT_ID.fetch_add(1, Ordering::Relaxed),
            text,
            nodes,
            thread_agnostic,
            has_cache,
            internal,
        }))
    }

    pub fn text(&self) -> &str {
        &self.0.text
    }

    /// Number of nodes after folding adjacent literals.
    pub fn node_count(&self) -> usize {
        self.0.nodes.len()
    }

    /// Names of the nodes in order; literals report as `literal`.
    pub fn node_names(&self) -> Vec<String> {
        self.0
            .nodes
            .iter()
            .map(|node| match node {
                Node::Literal { .. } => "literal".to_string(),
                Node::Renderer(r) => r.name().to_string(),
            })
            .collect()
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.0.nodes
    }

    pub fn is_thread_agnostic(&self) -> bool {
        self.0.thread_agnostic
    }

    pub fn has_cache(&self) -> bool {
        self.0.has_cache
    }

    /// True when every node is literal text.
    pub fn is_static(&self) -> bool {
        self.0
            .nodes
            .iter()
            .all(|node| matches!(node, Node::Literal { .. }))
    }

    pub fn render(&self, event: &LogEvent) -> Arc<str> {
        let lookup = self.0.has_cache || !self.0.thread_agnostic;
        if lookup {
            if let Some(value) = event.cached_layout_value(self.0.id) {
                return value;
            }
        }

        let value: Arc<str> = Arc::from(self.render_uncached(event));
        if self.0.has_cache {
            event.store_layout_value(self.0.id, value)
        } else {
            value
        }
    }

    /// Render into a plain `String`.
    pub fn render_string(&self, event: &LogEvent) -> String {
        self.render(event).to_string()
    }

    fn render_uncached(&self, event: &LogEvent) -> String {
        let mut out = String::new();
        for node in &self.0.nodes {
            match node {
                Node::Literal { text, .. } => out.push_str(text),
                Node::Renderer(renderer) => {
                    let mark = out.len();
                    if let Err(e) = renderer.append(event, &mut out) {
                        out.truncate(mark);
                        self.report(&e);
                    }
                }
            }
        }
        out
    }

    fn report(&self, error: &RenderError) {
        let message = format!(
            "Exception in layout renderer '{}': {}",
            error.renderer, error.message
        );
        match &self.0.internal {
            Some(internal) => internal.warn(message),
            None => tracing::warn!("{}", message),
        }
    }

    /// Capture the rendered value now, before the event leaves the
    /// logging thread. Agnostic layouts are left to render later.
    pub fn precalculate(&self, event: &LogEvent) {
        if self.0.thread_agnostic {
            return;
        }
        let value: Arc<str> = Arc::from(self.render_uncached(event));
        event.store_layout_value(self.0.id, value);
    }

    /// Typed value of a single-node layout, when its renderer exposes one.
    pub fn try_get_raw_value(&self, event: &LogEvent) -> Option<RawValue> {
        match self.0.nodes.as_slice() {
            [Node::Literal { raw, .. }] => raw.clone(),
            [Node::Renderer(renderer)] => renderer.raw_value(event),
            _ => None,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.text)
    }
}

impl PartialEq for Layout {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<&str> for Layout {
    fn from(text: &str) -> Self {
        Layout::literal(text)
    }
}

/// Compile `text`, honouring the strict flag: strict contexts propagate
/// the error, lenient ones report it and fall back to literal text.
pub(crate) fn compile_or_literal(text: &str, ctx: &LayoutContext) -> Result<Layout> {
    match Layout::compile(text, ctx) {
        Ok(layout) => Ok(layout),
        Err(e) if !ctx.is_strict() => {
            ctx.warn(format!("Failed to parse layout '{}': {}", text, e));
            Ok(Layout::literal(text))
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn unknown_renderer(name: &str) -> ConfigError {
    ConfigError::UnknownRenderer(name.to_string())
}
