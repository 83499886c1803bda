//! Builtin leaf renderers and their registrations.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Local, Timelike};

use crate::config::error::{RenderError, Result};
use crate::config::registry::Registry;
use crate::config::variables::VariableMap;
use crate::event::LogEvent;
use crate::layout::parser::RendererArgs;
use crate::layout::wrappers::{self, AmbientKind};
use crate::layout::{RawValue, Renderer, TimeSource};

const DEFAULT_DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

#[derive(Debug)]
pub struct LiteralRenderer {
    text: String,
}

impl Renderer for LiteralRenderer {
    fn name(&self) -> &str {
        "literal"
    }

    fn append(&self, _event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        out.push_str(&self.text);
        Ok(())
    }

    fn is_static(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct MessageRenderer;

impl Renderer for MessageRenderer {
    fn name(&self) -> &str {
        "message"
    }

    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        out.push_str(event.message());
        Ok(())
    }
}

#[derive(Debug)]
pub struct LevelRenderer {
    ordinal: bool,
}

impl Renderer for LevelRenderer {
    fn name(&self) -> &str {
        "level"
    }

    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        if self.ordinal {
            out.push_str(&event.level().ordinal().to_string());
        } else {
            out.push_str(event.level().as_str());
        }
        Ok(())
    }

    fn raw_value(&self, event: &LogEvent) -> Option<RawValue> {
        Some(RawValue::Level(event.level()))
    }
}

#[derive(Debug)]
pub struct LoggerNameRenderer {
    short_name: bool,
}

impl Renderer for LoggerNameRenderer {
    fn name(&self) -> &str {
        "logger"
    }

    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        let name = event.logger_name();
        if self.short_name {
            out.push_str(name.rsplit('.').next().unwrap_or(name));
        } else {
            out.push_str(name);
        }
        Ok(())
    }
}

thread_local! {
    /// Variables being rendered on this thread, innermost last.
    static RESOLVING: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Pops the variable pushed by `VariableRenderer::append`.
struct ResolvingGuard;

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// `${var:name}`: looks the variable up at render time.
///
/// Never thread agnostic: the value can be replaced at runtime by a layout
/// that reads thread state.
#[derive(Debug)]
pub struct VariableRenderer {
    variable: String,
    default: Option<String>,
    variables: Weak<VariableMap>,
}

impl Renderer for VariableRenderer {
    fn name(&self) -> &str {
        "var"
    }

    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        let value = self
            .variables
            .upgrade()
            .and_then(|variables| variables.get(&self.variable));
        let layout = match (value, &self.default) {
            (Some(layout), _) => layout,
            (None, Some(default)) => {
                out.push_str(default);
                return Ok(());
            }
            (None, None) => return Ok(()),
        };

        let recursive = RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|name| name.eq_ignore_ascii_case(&self.variable)) {
                return true;
            }
            stack.push(self.variable.clone());
            false
        });
        if recursive {
            return Err(RenderError::new(
                "var",
                format!("variable '{}' refers to itself", self.variable),
            ));
        }
        let _guard = ResolvingGuard;
        out.push_str(&layout.render(event));
        Ok(())
    }

    fn is_thread_agnostic(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct EventPropertyRenderer {
    item: String,
}

impl Renderer for EventPropertyRenderer {
    fn name(&self) -> &str {
        "event-property"
    }

    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        if let Some(value) = event.property(&self.item) {
            out.push_str(value);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ThreadNameRenderer;

impl Renderer for ThreadNameRenderer {
    fn name(&self) -> &str {
        "threadname"
    }

    fn append(&self, _event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        out.push_str(std::thread::current().name().unwrap_or_default());
        Ok(())
    }

    fn is_thread_agnostic(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct ThreadIdRenderer;

impl ThreadIdRenderer {
    fn current() -> String {
        // ThreadId only exposes its number through Debug: "ThreadId(7)"
        let debug = format!("{:?}", std::thread::current().id());
        debug
            .trim_start_matches("ThreadId(")
            .trim_end_matches(')')
            .to_string()
    }
}

impl Renderer for ThreadIdRenderer {
    fn name(&self) -> &str {
        "threadid"
    }

    fn append(&self, _event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        out.push_str(&Self::current());
        Ok(())
    }

    fn is_thread_agnostic(&self) -> bool {
        false
    }

    fn raw_value(&self, _event: &LogEvent) -> Option<RawValue> {
        Self::current().parse().ok().map(RawValue::Int)
    }
}

#[derive(Debug)]
pub struct ProcessIdRenderer;

impl Renderer for ProcessIdRenderer {
    fn name(&self) -> &str {
        "processid"
    }

    fn append(&self, _event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        out.push_str(&std::process::id().to_string());
        Ok(())
    }

    fn is_static(&self) -> bool {
        true
    }

    fn raw_value(&self, _event: &LogEvent) -> Option<RawValue> {
        Some(RawValue::Int(i64::from(std::process::id())))
    }
}

#[derive(Debug)]
pub struct NewLineRenderer;

impl Renderer for NewLineRenderer {
    fn name(&self) -> &str {
        "newline"
    }

    fn append(&self, _event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        out.push('\n');
        Ok(())
    }

    fn is_static(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct GuidRenderer {
    simple: bool,
}

impl Renderer for GuidRenderer {
    fn name(&self) -> &str {
        "guid"
    }

    fn append(&self, _event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        let id = uuid::Uuid::new_v4();
        if self.simple {
            out.push_str(&id.simple().to_string());
        } else {
            out.push_str(&id.hyphenated().to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateStyle {
    Short,
    Long,
}

/// `${date}` and `${longdate}`.
#[derive(Debug)]
pub struct DateRenderer {
    style: DateStyle,
    format: Option<String>,
    universal: bool,
}

impl DateRenderer {
    fn format_time<Tz: chrono::TimeZone>(&self, time: DateTime<Tz>) -> Result<String, std::fmt::Error>
    where
        Tz::Offset: std::fmt::Display,
    {
        use std::fmt::Write;

        let mut out = String::new();
        match (self.style, &self.format) {
            (DateStyle::Long, _) => write!(
                out,
                "{}.{:04}",
                time.format("%Y-%m-%d %H:%M:%S"),
                time.nanosecond() % 1_000_000_000 / 100_000
            )?,
            (DateStyle::Short, Some(format)) => write!(out, "{}", time.format(format))?,
            (DateStyle::Short, None) => write!(out, "{}", time.format(DEFAULT_DATE_FORMAT))?,
        }
        Ok(out)
    }
}

impl Renderer for DateRenderer {
    fn name(&self) -> &str {
        match self.style {
            DateStyle::Short => "date",
            DateStyle::Long => "longdate",
        }
    }

    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        let text = if self.universal {
            self.format_time(event.timestamp())
        } else {
            self.format_time(event.timestamp().with_timezone(&Local))
        };
        let text = text.map_err(|_| RenderError::new(self.name(), "invalid date format"))?;
        out.push_str(&text);
        Ok(())
    }

    fn raw_value(&self, event: &LogEvent) -> Option<RawValue> {
        Some(RawValue::Timestamp(event.timestamp()))
    }
}

type RenderFn = dyn Fn(&LogEvent) -> Result<String, String> + Send + Sync;

/// Renderer backed by a caller-supplied closure.
pub struct FnRenderer {
    name: String,
    thread_agnostic: bool,
    render: Arc<RenderFn>,
}

impl std::fmt::Debug for FnRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRenderer").field("name", &self.name).finish()
    }
}

impl FnRenderer {
    pub fn new(name: impl Into<String>, thread_agnostic: bool, render: Arc<RenderFn>) -> Self {
        Self {
            name: name.into(),
            thread_agnostic,
            render,
        }
    }
}

impl Renderer for FnRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&self, event: &LogEvent, out: &mut String) -> Result<(), RenderError> {
        let text = (self.render)(event).map_err(|message| RenderError::new(&self.name, message))?;
        out.push_str(&text);
        Ok(())
    }

    fn is_thread_agnostic(&self) -> bool {
        self.thread_agnostic
    }
}

fn time_is_universal(args: &RendererArgs, source: TimeSource) -> Result<bool> {
    match args.get("universalTime") {
        Some(_) => args.flag("universalTime"),
        None => Ok(source == TimeSource::Utc),
    }
}

/// Register every builtin renderer on `registry`.
pub(crate) fn register_builtins(registry: &Registry) {
    registry.register_renderer("literal", &["text"], Some("text"), |args, _| {
        Ok(Arc::new(LiteralRenderer {
            text: args.get("text").unwrap_or_default().to_string(),
        }))
    });
    registry.register_renderer("message", &[], None, |_, _| Ok(Arc::new(MessageRenderer)));
    registry.register_renderer("level", &["format"], Some("format"), |args, _| {
        let ordinal = args
            .get("format")
            .is_some_and(|f| f.eq_ignore_ascii_case("ordinal"));
        Ok(Arc::new(LevelRenderer { ordinal }))
    });
    registry.register_renderer("logger", &["shortName"], None, |args, _| {
        Ok(Arc::new(LoggerNameRenderer {
            short_name: args.flag("shortName")?,
        }))
    });
    registry.register_renderer("var", &["name", "default"], Some("name"), |args, ctx| {
        Ok(Arc::new(VariableRenderer {
            variable: args.get("name").unwrap_or_default().to_string(),
            default: args.get("default").map(str::to_string),
            variables: ctx.variables(),
        }))
    });
    for name in ["event-property", "event-properties"] {
        registry.register_renderer(name, &["item"], Some("item"), |args, _| {
            Ok(Arc::new(EventPropertyRenderer {
                item: args.get("item").unwrap_or_default().to_string(),
            }))
        });
    }
    registry.register_renderer("threadname", &[], None, |_, _| Ok(Arc::new(ThreadNameRenderer)));
    registry.register_renderer("threadid", &[], None, |_, _| Ok(Arc::new(ThreadIdRenderer)));
    registry.register_renderer("processid", &[], None, |_, _| Ok(Arc::new(ProcessIdRenderer)));
    registry.register_renderer("newline", &[], None, |_, _| Ok(Arc::new(NewLineRenderer)));
    registry.register_renderer("guid", &["format"], Some("format"), |args, _| {
        let simple = args.get("format").is_some_and(|f| f.eq_ignore_ascii_case("n"));
        Ok(Arc::new(GuidRenderer { simple }))
    });
    registry.register_renderer(
        "date",
        &["format", "universalTime"],
        Some("format"),
        |args, ctx| {
            Ok(Arc::new(DateRenderer {
                style: DateStyle::Short,
                format: args.get("format").map(str::to_string),
                universal: time_is_universal(args, ctx.time_source())?,
            }))
        },
    );
    registry.register_renderer("longdate", &["universalTime"], None, |args, ctx| {
        Ok(Arc::new(DateRenderer {
            style: DateStyle::Long,
            format: None,
            universal: time_is_universal(args, ctx.time_source())?,
        }))
    });

    let explicit: [(&str, AmbientKind, &[&str]); 5] = [
        ("uppercase", AmbientKind::Uppercase, &["inner", "uppercase"]),
        ("lowercase", AmbientKind::Lowercase, &["inner", "lowercase"]),
        (
            "pad",
            AmbientKind::Pad,
            &["inner", "padding", "padCharacter", "fixedLength"],
        ),
        ("cached", AmbientKind::Cached, &["inner", "cached"]),
        (
            "trimwhitespace",
            AmbientKind::TrimWhiteSpace,
            &["inner", "trimWhiteSpace"],
        ),
    ];
    for (name, kind, properties) in explicit {
        registry.register_renderer(name, properties, Some("inner"), move |args, ctx| {
            wrappers::explicit(kind, args, ctx)
        });
    }
}
