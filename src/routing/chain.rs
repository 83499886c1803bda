//! Per-level target chains.
//!
//! For one logger name, walk the rule list in order and collect, for each
//! level, the rule segments (filters plus targets) that should receive an
//! event. A final rule stops later rules for the levels it handles only.
//! Child rules are walked right after their parent, before the parent's
//! final flag takes effect.

use std::sync::Arc;

use crate::event::LogEvent;
use crate::level::LogLevel;
use crate::routing::filter::{FilterAction, FilterChain};
use crate::routing::rule::LoggingRule;
use crate::targets::Target;

/// The part of one rule that applies to one level.
#[derive(Debug, Clone)]
pub struct ChainLink {
    rule_name: Option<String>,
    filters: Arc<FilterChain>,
    targets: Vec<Arc<dyn Target>>,
}

impl ChainLink {
    pub fn rule_name(&self) -> Option<&str> {
        self.rule_name.as_deref()
    }

    pub fn targets(&self) -> &[Arc<dyn Target>] {
        &self.targets
    }

    /// The filter verdict for `event`.
    pub fn decide(&self, event: &LogEvent) -> FilterAction {
        if self.filters.is_empty() {
            FilterAction::Log
        } else {
            self.filters.decide(event)
        }
    }
}

/// Ordered links for a single level.
#[derive(Debug, Clone, Default)]
pub struct TargetChain {
    links: Vec<ChainLink>,
}

impl TargetChain {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Every target in delivery order, repeated if several rules name it.
    pub fn targets(&self) -> Vec<Arc<dyn Target>> {
        self.links
            .iter()
            .flat_map(|link| link.targets.iter().cloned())
            .collect()
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets().iter().map(|t| t.name().to_string()).collect()
    }
}

/// Target chains for every level of one logger.
#[derive(Debug, Clone, Default)]
pub struct LevelChains {
    chains: [TargetChain; LogLevel::COUNT],
}

impl LevelChains {
    pub fn build(logger_name: &str, rules: &[LoggingRule], threshold: LogLevel) -> Self {
        let mut chains = LevelChains::default();
        let mut suppressed = [false; LogLevel::COUNT];
        walk(logger_name, rules, threshold, &mut suppressed, &mut chains);
        chains
    }

    pub fn for_level(&self, level: LogLevel) -> Option<&TargetChain> {
        if level == LogLevel::Off {
            return None;
        }
        Some(&self.chains[level.ordinal()])
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.for_level(level).is_some_and(|chain| !chain.is_empty())
    }

    /// Every distinct target reachable from any level.
    pub fn all_targets(&self) -> Vec<Arc<dyn Target>> {
        let mut out: Vec<Arc<dyn Target>> = Vec::new();
        for target in self.chains.iter().flat_map(TargetChain::targets) {
            if !out.iter().any(|t| Arc::ptr_eq(t, &target)) {
                out.push(target);
            }
        }
        out
    }
}

fn walk(
    logger_name: &str,
    rules: &[LoggingRule],
    threshold: LogLevel,
    suppressed: &mut [bool; LogLevel::COUNT],
    chains: &mut LevelChains,
) {
    for rule in rules {
        if !rule.matcher().name_matches(Some(logger_name)) {
            continue;
        }

        let enabled = rule.resolved_levels();
        let mut finals = [false; LogLevel::COUNT];
        for level in LogLevel::ALL {
            let i = level.ordinal();
            if level < threshold || suppressed[i] || !enabled[i] {
                continue;
            }
            if !rule.targets().is_empty() {
                chains.chains[i].links.push(ChainLink {
                    rule_name: rule.name().map(str::to_string),
                    filters: rule.filters().clone(),
                    targets: rule.targets().to_vec(),
                });
            }
            finals[i] = rule.is_final_for(level);
        }

        if !rule.children().is_empty() {
            walk(logger_name, rule.children(), threshold, suppressed, chains);
        }

        for (slot, is_final) in suppressed.iter_mut().zip(finals) {
            *slot |= is_final;
        }
    }
}
