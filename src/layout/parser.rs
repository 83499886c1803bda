//! Template tokenizer and compiler.
//!
//! Placeholders are `${name:param=value:param2=value2}`. Parameter values
//! may contain nested placeholders to any depth; a backslash escapes the
//! next character inside parameter text. Boundaries are found with a
//! nesting counter rather than a regex.

use std::sync::Arc;

use crate::config::error::{ConfigError, Result};
use crate::event::LogEvent;
use crate::layout::wrappers::{self, AmbientKind};
use crate::layout::{unknown_renderer, LayoutContext, Node, Renderer};

/// One `name=value` (or bare default) parameter of a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Option<String>,
    pub value: String,
}

/// Output of the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Renderer { name: String, params: Vec<Param> },
}

/// Own parameters handed to a renderer factory, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RendererArgs {
    name: String,
    params: Vec<(String, String)>,
}

impl RendererArgs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(value) => parse_bool(key, value),
        }
    }

    pub fn int(&self, key: &str) -> Result<Option<i64>> {
        self.get(key)
            .map(|value| {
                value
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
            })
            .transpose()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected a boolean")),
    }
}

struct Tokenizer<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn at_placeholder(&self) -> bool {
        self.peek() == Some('$') && self.peek_at(1) == Some('{')
    }

    fn unterminated(&self) -> ConfigError {
        ConfigError::invalid("layout", self.source, "unterminated '${' placeholder")
    }

    fn segments(&mut self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        while let Some(ch) = self.peek() {
            if self.at_placeholder() {
                self.pos += 2;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(self.placeholder()?);
            } else {
                literal.push(ch);
                self.pos += 1;
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(segments)
    }

    fn placeholder(&mut self) -> Result<Segment> {
        let mut name = String::new();
        loop {
            match self.peek() {
                None => return Err(self.unterminated()),
                Some(':') | Some('}') => break,
                Some(ch) => {
                    name.push(ch);
                    self.pos += 1;
                }
            }
        }

        let mut params = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.unterminated()),
                Some('}') => break,
                Some(':') => {
                    let key = self.text(true)?;
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        let value = self.text(false)?;
                        params.push(Param {
                            name: Some(key.trim().to_string()),
                            value,
                        });
                    } else {
                        params.push(Param {
                            name: None,
                            value: key,
                        });
                    }
                }
                Some(_) => return Err(self.unterminated()),
            }
        }

        Ok(Segment::Renderer {
            name: name.trim().to_string(),
            params,
        })
    }

    /// Read parameter text up to an unnested `:` or `}` (and `=` when
    /// reading a name). Nested placeholders are kept verbatim so they can
    /// be compiled later; escapes are only resolved at depth zero.
    fn text(&mut self, stop_at_equals: bool) -> Result<String> {
        let mut out = String::new();
        let mut depth = 0usize;
        loop {
            let Some(ch) = self.peek() else {
                return Err(self.unterminated());
            };
            match ch {
                '\\' => {
                    self.pos += 1;
                    let escaped = self.bump().ok_or_else(|| self.unterminated())?;
                    if depth > 0 {
                        out.push('\\');
                    }
                    out.push(escaped);
                }
                '$' if self.peek_at(1) == Some('{') => {
                    self.pos += 2;
                    depth += 1;
                    out.push_str("${");
                }
                '}' if depth > 0 => {
                    self.pos += 1;
                    depth -= 1;
                    out.push('}');
                }
                '}' | ':' if depth == 0 => break,
                '=' if depth == 0 && stop_at_equals => break,
                _ => {
                    self.pos += 1;
                    out.push(ch);
                }
            }
        }
        Ok(out)
    }
}

/// Split a template into literal and placeholder segments.
pub fn tokenize(template: &str) -> Result<Vec<Segment>> {
    Tokenizer::new(template).segments()
}

pub(crate) fn compile_nodes(template: &str, ctx: &LayoutContext) -> Result<Vec<Node>> {
    let mut nodes: Vec<Node> = Vec::new();
    for segment in tokenize(template)? {
        match segment {
            Segment::Literal(text) => push_literal(&mut nodes, text, None),
            Segment::Renderer { name, params } => match build_renderer(&name, &params, ctx) {
                Ok(renderer) if renderer.is_static() => {
                    let event = LogEvent::null();
                    let mut text = String::new();
                    match renderer.append(&event, &mut text) {
                        Ok(()) => push_literal(&mut nodes, text, renderer.raw_value(&event)),
                        Err(_) => nodes.push(Node::Renderer(renderer)),
                    }
                }
                Ok(renderer) => nodes.push(Node::Renderer(renderer)),
                Err(e) if ctx.is_strict() => return Err(e),
                Err(e) => {
                    ctx.warn(format!(
                        "Error parsing layout '{}', skipping '${{{}}}': {}",
                        template, name, e
                    ));
                }
            },
        }
    }
    Ok(nodes)
}

fn push_literal(nodes: &mut Vec<Node>, text: String, raw: Option<crate::layout::RawValue>) {
    if let Some(Node::Literal {
        text: previous,
        raw: previous_raw,
    }) = nodes.last_mut()
    {
        previous.push_str(&text);
        *previous_raw = None;
        return;
    }
    nodes.push(Node::Literal { text, raw });
}

/// Build one placeholder: the named renderer with its own parameters,
/// then ambient wrappers grouped by kind in first-appearance order.
/// The first group is innermost, the last-declared group outermost.
pub(crate) fn build_renderer(
    name: &str,
    params: &[Param],
    ctx: &LayoutContext,
) -> Result<Arc<dyn Renderer>> {
    let registration = ctx
        .registry()
        .renderer(name)
        .ok_or_else(|| unknown_renderer(name))?;

    let mut args = RendererArgs::new(name);
    let mut ambient: Vec<(AmbientKind, Vec<(String, String)>)> = Vec::new();

    for param in params {
        match &param.name {
            None => match registration.default_property() {
                Some(default) => args.params.push((default.to_string(), param.value.clone())),
                None => {
                    let e = ConfigError::invalid(
                        name,
                        &param.value,
                        "renderer has no default parameter",
                    );
                    if ctx.is_strict() {
                        return Err(e);
                    }
                    ctx.warn(e);
                }
            },
            Some(key) if registration.has_property(key) => {
                args.params.push((key.clone(), param.value.clone()));
            }
            Some(key) => match AmbientKind::for_parameter(key) {
                Some(kind) => {
                    let entry = (key.clone(), param.value.clone());
                    match ambient.iter_mut().find(|(k, _)| *k == kind) {
                        Some((_, group)) => group.push(entry),
                        None => ambient.push((kind, vec![entry])),
                    }
                }
                None => {
                    let e = ConfigError::invalid(
                        key,
                        &param.value,
                        format!("unknown parameter of layout renderer '{}'", name),
                    );
                    if ctx.is_strict() {
                        return Err(e);
                    }
                    ctx.warn(e);
                }
            },
        }
    }

    let mut renderer = registration.create(&args, ctx)?;
    for (kind, group) in ambient {
        renderer = wrappers::wrap_ambient(kind, renderer, &group, ctx)?;
    }
    Ok(renderer)
}
