//! Wrapper renderers.
//!
//! Each wrapper transforms the output of an inner layout. They are used
//! explicitly (`${uppercase:inner=${logger}}`) or as ambient parameters on
//! any renderer (`${logger:uppercase=true}`).

use std::sync::{Arc, Mutex};

use crate::config::error::{ConfigError, RenderError, Result};
use crate::event::LogEvent;
use crate::layout::parser::{parse_bool, RendererArgs};
use crate::layout::{Layout, LayoutContext, Renderer};

/// Ambient wrapper families, keyed by the parameters they own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientKind {
    Uppercase,
    Lowercase,
    Pad,
    Cached,
    TrimWhiteSpace,
}

impl AmbientKind {
    pub fn for_parameter(name: &str) -> Option<AmbientKind> {
        match name.to_ascii_lowercase().as_str() {
            "uppercase" => Some(AmbientKind::Uppercase),
            "lowercase" => Some(AmbientKind::Lowercase),
            "padding" | "padcharacter" | "fixedlength" => Some(AmbientKind::Pad),
            "cached" => Some(AmbientKind::Cached),
            "trimwhitespace" => Some(AmbientKind::TrimWhiteSpace),
            _ => None,
        }
    }

    fn renderer_name(self) -> &'static str {
        match self {
            AmbientKind::Uppercase => "uppercase",
            AmbientKind::Lowercase => "lowercase",
            AmbientKind::Pad => "pad",
            AmbientKind::Cached => "cached",
            AmbientKind::TrimWhiteSpace => "trimwhitespace",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Transform {
    Uppercase,
    Lowercase,
    Pad {
        padding: i64,
        pad_character: char,
        fixed_length: bool,
    },
    Cached,
    Trim,
    Passthrough,
}

#[derive(Debug)]
pub struct WrapperRenderer {
    name: &'static str,
    transform: Transform,
    inner: Layout,
    cache: Mutex<Option<(u64, Arc<str>)>>,
}

impl WrapperRenderer {
    fn new(name: &'static str, transform: Transform, inner: Layout) -> Self {
        Self {
            name,
            transform,
            inner,
            cache: Mutex::new(None),
        }
    }

    fn cached_inner(&self, event: &LogEvent) -> Arc<str> {
        let mut slot = self.cache.lock().expect("wrapper cache lock poisoned");
        if let Some((id, value)) = slot.as_ref() {
            if *id == event.id() {
                return value.clone();
            }
        }
        let value = self.inner.render(event);
        *slot = Some((event.id(), value.clone()));
        value
    }
}

impl Renderer for WrapperRenderer {
    fn name(&self) -> &str {
        self.name
    }

    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        match self.transform {
            Transform::Cached => out.push_str(&self.cached_inner(event)),
            Transform::Uppercase => out.push_str(&self.inner.render(event).to_uppercase()),
            Transform::Lowercase => out.push_str(&self.inner.render(event).to_lowercase()),
            Transform::Trim => out.push_str(self.inner.render(event).trim()),
            Transform::Passthrough => out.push_str(&self.inner.render(event)),
            Transform::Pad {
                padding,
                pad_character,
                fixed_length,
            } => {
                let text = self.inner.render(event);
                out.push_str(&pad(&text, padding, pad_character, fixed_length));
            }
        }
        Ok(())
    }

    fn is_static(&self) -> bool {
        !matches!(self.transform, Transform::Cached) && self.inner.is_static()
    }

    fn is_thread_agnostic(&self) -> bool {
        self.inner.is_thread_agnostic()
    }

    fn is_caching(&self) -> bool {
        matches!(self.transform, Transform::Cached)
    }

    fn inner(&self) -> Option<&Layout> {
        Some(&self.inner)
    }
}

/// Positive padding aligns right, negative aligns left.
fn pad(text: &str, padding: i64, pad_character: char, fixed_length: bool) -> String {
    let width = padding.unsigned_abs() as usize;
    let len = text.chars().count();
    if len >= width {
        if fixed_length && len > width {
            return text.chars().take(width).collect();
        }
        return text.to_string();
    }
    let fill: String = std::iter::repeat(pad_character).take(width - len).collect();
    if padding > 0 {
        format!("{fill}{text}")
    } else {
        format!("{text}{fill}")
    }
}

fn transform_for(
    kind: AmbientKind,
    params: &[(String, String)],
) -> Result<Option<Transform>> {
    let lookup = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    };
    let enabled = |key: &str| lookup(key).map_or(Ok(true), |v| parse_bool(key, v));

    let transform = match kind {
        AmbientKind::Uppercase => enabled("uppercase")?.then_some(Transform::Uppercase),
        AmbientKind::Lowercase => enabled("lowercase")?.then_some(Transform::Lowercase),
        AmbientKind::Cached => enabled("cached")?.then_some(Transform::Cached),
        AmbientKind::TrimWhiteSpace => enabled("trimwhitespace")?.then_some(Transform::Trim),
        AmbientKind::Pad => {
            let padding = match lookup("padding") {
                Some(v) => v
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| ConfigError::invalid("padding", v, e.to_string()))?,
                None => 0,
            };
            let pad_character = match lookup("padcharacter") {
                Some(v) => v.chars().next().unwrap_or(' '),
                None => ' ',
            };
            let fixed_length = match lookup("fixedlength") {
                Some(v) => parse_bool("fixedLength", v)?,
                None => false,
            };
            (padding != 0).then_some(Transform::Pad {
                padding,
                pad_character,
                fixed_length,
            })
        }
    };
    Ok(transform)
}

/// Wrap `renderer` in the ambient wrapper for `kind`. Disabled wrappers
/// (`uppercase=false`, `padding=0`) leave the renderer untouched.
pub(crate) fn wrap_ambient(
    kind: AmbientKind,
    renderer: Arc<dyn Renderer>,
    params: &[(String, String)],
    ctx: &LayoutContext,
) -> Result<Arc<dyn Renderer>> {
    let Some(transform) = transform_for(kind, params)? else {
        return Ok(renderer);
    };
    let inner = Layout::from_renderer(renderer, ctx.internal().cloned());
    Ok(Arc::new(WrapperRenderer::new(
        kind.renderer_name(),
        transform,
        inner,
    )))
}

/// Factory for an explicit wrapper renderer such as `${pad:inner=...}`.
pub(crate) fn explicit(
    kind: AmbientKind,
    args: &RendererArgs,
    ctx: &LayoutContext,
) -> Result<Arc<dyn Renderer>> {
    let inner = match args.get("inner") {
        Some(text) => Layout::compile(text, ctx)?,
        None => Layout::literal(""),
    };
    let params: Vec<(String, String)> = args
        .params()
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("inner"))
        .cloned()
        .collect();
    let transform = transform_for(kind, &params)?.unwrap_or(Transform::Passthrough);
    Ok(Arc::new(WrapperRenderer::new(
        kind.renderer_name(),
        transform,
        inner,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LogLevel;

    fn render(template: &str, message: &str) -> String {
        let layout = Layout::parse(template).unwrap();
        layout.render_string(&LogEvent::new(LogLevel::Info, "Logger", message))
    }

    #[test]
    fn test_pad_aligns_by_sign() {
        assert_eq!(pad("ab", 4, ' ', false), "  ab");
        assert_eq!(pad("ab", -4, '-', false), "ab--");
        assert_eq!(pad("abcdef", 4, ' ', false), "abcdef");
        assert_eq!(pad("abcdef", 4, ' ', true), "abcd");
    }

    #[test]
    fn test_explicit_and_ambient_wrappers_agree() {
        assert_eq!(render("${uppercase:inner=${message}}", "hi"), "HI");
        assert_eq!(render("${message:uppercase=true}", "hi"), "HI");
        assert_eq!(render("${lowercase:inner=${logger}}", ""), "logger");
        assert_eq!(render("${trimwhitespace:inner=${message}}", "  x  "), "x");
        assert_eq!(render("${message:trimWhiteSpace=true}", "  x  "), "x");
    }

    #[test]
    fn test_disabled_ambient_wrapper_is_skipped() {
        let layout = Layout::parse("${message:uppercase=false}").unwrap();
        assert_eq!(layout.node_names(), vec!["message"]);
        assert!(!layout.has_cache());
    }

    #[test]
    fn test_explicit_cached_wrapper_marks_layout() {
        let layout = Layout::parse("a${cached:inner=${message}}b").unwrap();
        assert!(layout.has_cache());
        let event = LogEvent::new(LogLevel::Info, "x", "m");
        assert!(Arc::ptr_eq(&layout.render(&event), &layout.render(&event)));
    }

    #[test]
    fn test_static_inner_folds_to_literal() {
        let layout = Layout::parse("${uppercase:inner=abc}-${message}").unwrap();
        assert_eq!(layout.node_names(), vec!["literal", "message"]);
        assert_eq!(render("${uppercase:inner=abc}-${message}", "m"), "ABC-m");
    }
}
