//! Per-rule filter chains.
//!
//! A filter renders a layout for the event, tests a condition on the
//! result and yields an action. Filters run in declaration order and the
//! first non-neutral action is the verdict for that rule; the filters
//! after it are skipped.

use std::fmt;
use std::str::FromStr;

use crate::event::LogEvent;
use crate::layout::Layout;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterAction {
    #[default]
    Neutral,
    Log,
    Ignore,
    LogFinal,
    IgnoreFinal,
}

impl FilterAction {
    pub fn is_final(self) -> bool {
        matches!(self, FilterAction::LogFinal | FilterAction::IgnoreFinal)
    }

    /// Whether the event reaches the rule's targets.
    pub fn allows(self) -> bool {
        !matches!(self, FilterAction::Ignore | FilterAction::IgnoreFinal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterAction::Neutral => "Neutral",
            FilterAction::Log => "Log",
            FilterAction::Ignore => "Ignore",
            FilterAction::LogFinal => "LogFinal",
            FilterAction::IgnoreFinal => "IgnoreFinal",
        }
    }
}

impl FromStr for FilterAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(FilterAction::Neutral),
            "log" => Ok(FilterAction::Log),
            "ignore" => Ok(FilterAction::Ignore),
            "logfinal" => Ok(FilterAction::LogFinal),
            "ignorefinal" => Ok(FilterAction::IgnoreFinal),
            other => Err(format!("unknown filter action '{}'", other)),
        }
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterCondition {
    Contains(String),
    NotContains(String),
    Equal(String),
    NotEqual(String),
}

impl FilterCondition {
    /// Build from a markup element name (`whenContains`, ...) and its
    /// comparison text (`substring` or `compareTo`).
    pub fn from_element(element: &str, operand: String) -> Option<Self> {
        match element.to_ascii_lowercase().as_str() {
            "whencontains" => Some(FilterCondition::Contains(operand)),
            "whennotcontains" => Some(FilterCondition::NotContains(operand)),
            "whenequal" => Some(FilterCondition::Equal(operand)),
            "whennotequal" => Some(FilterCondition::NotEqual(operand)),
            _ => None,
        }
    }

    /// Attribute holding the operand for this element kind.
    pub fn operand_attribute(element: &str) -> &'static str {
        match element.to_ascii_lowercase().as_str() {
            "whenequal" | "whennotequal" => "compareTo",
            _ => "substring",
        }
    }

    fn holds(&self, text: &str, ignore_case: bool) -> bool {
        let fold = |s: &str| {
            if ignore_case {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        };
        let text = fold(text);
        match self {
            FilterCondition::Contains(s) => text.contains(&fold(s)),
            FilterCondition::NotContains(s) => !text.contains(&fold(s)),
            FilterCondition::Equal(s) => text == fold(s),
            FilterCondition::NotEqual(s) => text != fold(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    condition: FilterCondition,
    layout: Layout,
    action: FilterAction,
    ignore_case: bool,
}

impl Filter {
    pub fn new(condition: FilterCondition, layout: Layout, action: FilterAction) -> Self {
        Self {
            condition,
            layout,
            action,
            ignore_case: false,
        }
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn condition(&self) -> &FilterCondition {
        &self.condition
    }

    pub fn action(&self) -> FilterAction {
        self.action
    }

    /// The configured action when the condition holds, else `Neutral`.
    pub fn evaluate(&self, event: &LogEvent) -> FilterAction {
        let text = self.layout.render(event);
        if self.condition.holds(&text, self.ignore_case) {
            self.action
        } else {
            FilterAction::Neutral
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
    default_action: FilterAction,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    /// Action used when no filter matches. `Neutral` means log.
    pub fn set_default_action(&mut self, action: FilterAction) {
        self.default_action = action;
    }

    pub fn default_action(&self) -> FilterAction {
        self.default_action
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The first filter with a non-neutral verdict decides; later filters
    /// are not evaluated.
    pub fn decide(&self, event: &LogEvent) -> FilterAction {
        let decided = self
            .filters
            .iter()
            .map(|filter| filter.evaluate(event))
            .find(|action| *action != FilterAction::Neutral);
        match (decided, self.default_action) {
            (Some(action), _) => action,
            (None, FilterAction::Neutral) => FilterAction::Log,
            (None, default) => default,
        }
    }
}
