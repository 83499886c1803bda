//! Logging rules.
//!
//! # Responsibilities
//! - Bind a logger-name matcher to a set of levels, filters and targets
//! - Resolve deferred level expressions (`levels='${var:lvl}'`) on demand
//! - Offer the programmatic construction surface used before activation
//!
//! # Design Decisions
//! - Explicit level lists keep duplicates as written; membership checks
//!   ignore them
//! - `Off` is never an enabled level
//! - Targets are de-duplicated by name within one rule only

use std::fmt;
use std::sync::Arc;

use crate::event::LogEvent;
use crate::layout::Layout;
use crate::level::LogLevel;
use crate::routing::filter::{Filter, FilterAction, FilterChain};
use crate::routing::matcher::NameMatcher;
use crate::targets::Target;

/// Level expressions evaluated each time logger chains are rebuilt.
#[derive(Debug, Clone)]
pub enum DynamicLevels {
    /// Comma-separated list, as in `levels='${var:levels}'`.
    List(Layout),
    /// `minlevel` and/or `maxlevel`, either of which may be absent.
    Range {
        min: Option<Layout>,
        max: Option<Layout>,
    },
}

#[derive(Debug, Clone)]
pub struct LoggingRule {
    name: Option<String>,
    matcher: NameMatcher,
    levels: Vec<LogLevel>,
    dynamic: Option<DynamicLevels>,
    is_final: bool,
    final_min_level: Option<LogLevel>,
    filters: Arc<FilterChain>,
    targets: Vec<Arc<dyn Target>>,
    children: Vec<LoggingRule>,
}

impl LoggingRule {
    /// A rule for `pattern` with no levels and no targets.
    pub fn new(pattern: &str) -> Self {
        Self {
            name: None,
            matcher: NameMatcher::new(pattern),
            levels: Vec::new(),
            dynamic: None,
            is_final: false,
            final_min_level: None,
            filters: Arc::new(FilterChain::new()),
            targets: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn for_range(pattern: &str, min: LogLevel, max: LogLevel, target: Arc<dyn Target>) -> Self {
        let mut rule = Self::new(pattern);
        rule.enable_logging_for_levels(min, max);
        rule.add_target(target);
        rule
    }

    pub fn for_level(pattern: &str, level: LogLevel, target: Arc<dyn Target>) -> Self {
        Self::for_range(pattern, level, level, target)
    }

    pub fn for_all_levels(pattern: &str, target: Arc<dyn Target>) -> Self {
        Self::for_range(pattern, LogLevel::MIN, LogLevel::MAX, target)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn matcher(&self) -> &NameMatcher {
        &self.matcher
    }

    pub fn logger_name_pattern(&self) -> Option<&str> {
        self.matcher.pattern()
    }

    pub fn set_logger_name_pattern(&mut self, pattern: Option<&str>) {
        self.matcher = NameMatcher::create(pattern);
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn set_final(&mut self, is_final: bool) {
        self.is_final = is_final;
    }

    pub fn final_min_level(&self) -> Option<LogLevel> {
        self.final_min_level
    }

    /// Levels at or above `level` are enabled and final for this rule.
    pub fn set_final_min_level(&mut self, level: Option<LogLevel>) {
        self.final_min_level = level.filter(|l| *l != LogLevel::Off);
    }

    pub fn enable_logging_for_level(&mut self, level: LogLevel) {
        if level != LogLevel::Off {
            self.levels.push(level);
        }
    }

    pub fn enable_logging_for_levels(&mut self, min: LogLevel, max: LogLevel) {
        let max = if max == LogLevel::Off { LogLevel::MAX } else { max };
        for level in LogLevel::ALL {
            if level >= min && level <= max && !self.levels.contains(&level) {
                self.levels.push(level);
            }
        }
    }

    pub fn disable_logging_for_level(&mut self, level: LogLevel) {
        self.levels.retain(|l| *l != level);
    }

    /// Replace all levels with the contiguous range `min..=max`.
    pub fn set_logging_levels(&mut self, min: LogLevel, max: LogLevel) {
        self.levels.clear();
        self.dynamic = None;
        self.enable_logging_for_levels(min, max);
    }

    pub fn set_dynamic_levels(&mut self, dynamic: Option<DynamicLevels>) {
        self.dynamic = dynamic;
    }

    pub fn dynamic_levels(&self) -> Option<&DynamicLevels> {
        self.dynamic.as_ref()
    }

    /// Enabled levels in declaration order, duplicates preserved.
    pub fn levels(&self) -> Vec<LogLevel> {
        match &self.dynamic {
            None => self.levels.clone(),
            Some(_) => {
                let bits = self.resolved_levels();
                LogLevel::ALL.into_iter().filter(|l| bits[l.ordinal()]).collect()
            }
        }
    }

    pub fn is_logging_enabled_for_level(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && self.resolved_levels()[level.ordinal()]
    }

    /// Enabled-level bitset, evaluating dynamic expressions now.
    pub fn resolved_levels(&self) -> [bool; LogLevel::COUNT] {
        let mut bits = [false; LogLevel::COUNT];
        match &self.dynamic {
            None => {
                for level in &self.levels {
                    if *level != LogLevel::Off {
                        bits[level.ordinal()] = true;
                    }
                }
            }
            Some(dynamic) => resolve_dynamic(dynamic, &mut bits),
        }
        if let Some(min) = self.final_min_level {
            for level in LogLevel::ALL.into_iter().filter(|l| *l >= min) {
                bits[level.ordinal()] = true;
            }
        }
        bits
    }

    /// Whether this rule stops later rules for `level`.
    pub fn is_final_for(&self, level: LogLevel) -> bool {
        self.is_final || self.final_min_level.is_some_and(|min| level >= min)
    }

    pub fn filters(&self) -> &Arc<FilterChain> {
        &self.filters
    }

    pub fn add_filter(&mut self, filter: Filter) {
        Arc::make_mut(&mut self.filters).push(filter);
    }

    pub fn set_default_filter_action(&mut self, action: FilterAction) {
        Arc::make_mut(&mut self.filters).set_default_action(action);
    }

    pub fn targets(&self) -> &[Arc<dyn Target>] {
        &self.targets
    }

    /// Add `target` unless one with the same name is already present.
    pub fn add_target(&mut self, target: Arc<dyn Target>) -> bool {
        if self
            .targets
            .iter()
            .any(|t| t.name().eq_ignore_ascii_case(target.name()))
        {
            return false;
        }
        self.targets.push(target);
        true
    }

    pub fn remove_target(&mut self, name: &str) -> bool {
        let before = self.targets.len();
        self.targets.retain(|t| !t.name().eq_ignore_ascii_case(name));
        before != self.targets.len()
    }

    pub fn children(&self) -> &[LoggingRule] {
        &self.children
    }

    pub fn add_child_rule(&mut self, rule: LoggingRule) {
        self.children.push(rule);
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<LoggingRule> {
        &mut self.children
    }
}

fn render_level_text(layout: &Layout) -> String {
    layout.render(&LogEvent::null()).trim().to_string()
}

fn resolve_dynamic(dynamic: &DynamicLevels, bits: &mut [bool; LogLevel::COUNT]) {
    match dynamic {
        DynamicLevels::List(layout) => {
            for token in render_level_text(layout).split(',') {
                let level = LogLevel::parse_lenient(token);
                if level != LogLevel::Off {
                    bits[level.ordinal()] = true;
                }
            }
        }
        DynamicLevels::Range { min, max } => {
            let min = min
                .as_ref()
                .map(|l| parse_bound(&render_level_text(l), LogLevel::MIN))
                .unwrap_or(LogLevel::MIN);
            let max = max
                .as_ref()
                .map(|l| parse_bound(&render_level_text(l), LogLevel::MAX))
                .unwrap_or(LogLevel::MAX);
            let max = if max == LogLevel::Off { LogLevel::MAX } else { max };
            for level in LogLevel::ALL {
                if level >= min && level <= max {
                    bits[level.ordinal()] = true;
                }
            }
        }
    }
}

fn parse_bound(text: &str, empty: LogLevel) -> LogLevel {
    if text.is_empty() {
        empty
    } else {
        LogLevel::parse_lenient(text)
    }
}

impl fmt::Display for LoggingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "logNamePattern: {} levels: [ ", self.matcher)?;
        for level in self.levels() {
            write!(f, "{} ", level)?;
        }
        write!(f, "] writeTo: [ ")?;
        for target in &self.targets {
            write!(f, "{} ", target.name())?;
        }
        write!(f, "]")?;
        if self.is_final {
            write!(f, " final")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::variables::VariableMap;
    use crate::layout::LayoutContext;
    use crate::targets::MemoryTarget;

    fn memory(name: &str) -> Arc<dyn Target> {
        Arc::new(MemoryTarget::with_message_layout(name))
    }

    #[test]
    fn test_range_levels_are_contiguous() {
        let rule = LoggingRule::for_range("*", LogLevel::Info, LogLevel::Error, memory("d1"));
        assert_eq!(
            rule.levels(),
            vec![LogLevel::Info, LogLevel::Warn, LogLevel::Error]
        );
        assert!(!rule.is_logging_enabled_for_level(LogLevel::Debug));
        assert!(!rule.is_logging_enabled_for_level(LogLevel::Off));
    }

    #[test]
    fn test_explicit_duplicates_are_preserved() {
        let mut rule = LoggingRule::new("*");
        rule.enable_logging_for_level(LogLevel::Error);
        rule.enable_logging_for_level(LogLevel::Error);
        rule.enable_logging_for_level(LogLevel::Off);
        assert_eq!(rule.levels(), vec![LogLevel::Error, LogLevel::Error]);
    }

    #[test]
    fn test_targets_deduplicated_by_name() {
        let mut rule = LoggingRule::new("*");
        assert!(rule.add_target(memory("d1")));
        assert!(!rule.add_target(memory("D1")));
        assert_eq!(rule.targets().len(), 1);
    }

    #[test]
    fn test_display_names_matcher_kind() {
        let rule = LoggingRule::for_level("App.*", LogLevel::Info, memory("d1"));
        let text = rule.to_string();
        assert_eq!(text, "logNamePattern: (App.:StartsWith) levels: [ Info ] writeTo: [ d1 ]");
        assert!(LoggingRule::new("*a*b").to_string().contains(":MultiplePattern)"));
        assert!(LoggingRule::new("*Data*").to_string().contains(":Contains)"));
    }

    #[test]
    fn test_final_min_level_enables_upper_levels() {
        let mut rule = LoggingRule::new("*");
        rule.set_final_min_level(Some(LogLevel::Warn));
        assert!(rule.is_logging_enabled_for_level(LogLevel::Fatal));
        assert!(!rule.is_logging_enabled_for_level(LogLevel::Info));
        assert!(rule.is_final_for(LogLevel::Warn));
        assert!(!rule.is_final_for(LogLevel::Info));
    }

    #[test]
    fn test_dynamic_levels_follow_variable() {
        let variables = Arc::new(VariableMap::new());
        variables.set_text("lvl", "Warn");
        let ctx = LayoutContext::default().with_variables(&variables);
        let mut rule = LoggingRule::new("*");
        rule.set_dynamic_levels(Some(DynamicLevels::Range {
            min: Some(Layout::compile("${var:lvl}", &ctx).unwrap()),
            max: None,
        }));
        assert!(!rule.is_logging_enabled_for_level(LogLevel::Info));
        assert!(rule.is_logging_enabled_for_level(LogLevel::Error));

        variables.set_text("lvl", "Debug");
        assert!(rule.is_logging_enabled_for_level(LogLevel::Info));

        variables.set_text("lvl", "Wrong");
        assert!(!rule.is_logging_enabled_for_level(LogLevel::Fatal));
    }
}
