//! The configuration snapshot.
//!
//! # Responsibilities
//! - Hold the targets, rules, variables and settings produced by one parse
//!   (or assembled through the programmatic API)
//! - Remember where it came from so `reload` can re-parse the same source
//! - Own the dispatch gate that lets the factory close old targets only
//!   after in-flight writes have finished
//!
//! # Design Decisions
//! - Targets are keyed case-insensitively; re-adding under an existing key
//!   replaces the association without renaming the target
//! - `reload` never touches `self`; it returns a fresh snapshot

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::config::error::{Result, TargetError};
use crate::config::loader::{self, WatchedFile};
use crate::config::parser;
use crate::config::registry::Registry;
use crate::config::services::ServiceRepository;
use crate::config::settings::{ConfigSettings, LogFactoryOptions};
use crate::config::variables::VariableMap;
use crate::layout::LayoutContext;
use crate::level::LogLevel;
use crate::observability::internal::InternalLogger;
use crate::routing::rule::LoggingRule;
use crate::targets::{downcast_target, Target, TargetContext};

/// Where a configuration was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Text {
        text: String,
        base_dir: Option<PathBuf>,
    },
}

/// Shared services every parse needs. Cloning shares the same instances.
#[derive(Debug, Clone)]
pub struct ConfigEnvironment {
    pub registry: Arc<Registry>,
    pub services: Arc<ServiceRepository>,
    pub internal: Arc<InternalLogger>,
    pub options: LogFactoryOptions,
}

impl ConfigEnvironment {
    pub fn new(options: LogFactoryOptions) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            services: Arc::new(ServiceRepository::new()),
            internal: Arc::new(InternalLogger::new(options.internal_log_level)),
            options,
        }
    }

    /// Strictness before any document has been read.
    pub fn throws_config_exceptions(&self) -> bool {
        self.options.throw_config_exceptions || self.options.throw_exceptions
    }
}

impl Default for ConfigEnvironment {
    fn default() -> Self {
        Self::new(LogFactoryOptions::default())
    }
}

pub struct LoggingConfiguration {
    id: Uuid,
    rules: Vec<LoggingRule>,
    targets: Vec<(String, Arc<dyn Target>)>,
    variables: Arc<VariableMap>,
    settings: ConfigSettings,
    source: Option<ConfigSource>,
    watched_files: Vec<WatchedFile>,
    env: ConfigEnvironment,
    /// `true` while events may be dispatched to this snapshot's targets.
    pub(crate) gate: RwLock<bool>,
}

impl LoggingConfiguration {
    /// An empty configuration for programmatic assembly.
    pub fn new() -> Self {
        Self::with_environment(ConfigEnvironment::default())
    }

    pub fn with_environment(env: ConfigEnvironment) -> Self {
        Self {
            id: Uuid::new_v4(),
            rules: Vec::new(),
            targets: Vec::new(),
            variables: Arc::new(VariableMap::new()),
            settings: ConfigSettings::default(),
            source: None,
            watched_files: Vec::new(),
            env,
            gate: RwLock::new(true),
        }
    }

    /// Load a file, following the environment's failure policy.
    ///
    /// When config exceptions are off, a document that cannot be read or
    /// parsed still yields an empty configuration that watches the file.
    pub fn load_file(path: &Path, env: ConfigEnvironment) -> Result<Self> {
        Self::load(ConfigSource::File(path.to_path_buf()), env)
    }

    pub fn load_str(text: &str, base_dir: Option<&Path>, env: ConfigEnvironment) -> Result<Self> {
        Self::load(
            ConfigSource::Text {
                text: text.to_string(),
                base_dir: base_dir.map(Path::to_path_buf),
            },
            env,
        )
    }

    pub fn load(source: ConfigSource, env: ConfigEnvironment) -> Result<Self> {
        match parser::parse(&source, &env, Vec::new()) {
            Ok(config) => Ok(config),
            Err(failure) if failure.strict || env.throws_config_exceptions() => Err(failure.error),
            Err(failure) => {
                env.internal.error(format!(
                    "Failed loading configuration, continuing with empty configuration: {}",
                    failure.error
                ));
                Ok(Self::empty_for(source, env))
            }
        }
    }

    /// Placeholder for a source that failed to parse, still watched when
    /// the raw text asks for auto reload.
    fn empty_for(source: ConfigSource, env: ConfigEnvironment) -> Self {
        let mut config = Self::with_environment(env);
        if let ConfigSource::File(path) = &source {
            let auto_reload = std::fs::read_to_string(path)
                .map(|text| loader::sniff_auto_reload(&text))
                .unwrap_or(false);
            config.settings.auto_reload = auto_reload;
            config.watched_files.push(WatchedFile {
                path: loader::normalize_path(path),
                auto_reload,
            });
        }
        config.source = Some(source);
        config
    }

    pub(crate) fn from_parts(
        env: ConfigEnvironment,
        settings: ConfigSettings,
        variables: Arc<VariableMap>,
        source: ConfigSource,
        watched_files: Vec<WatchedFile>,
    ) -> Self {
        let mut config = Self::with_environment(env);
        config.settings = settings;
        config.variables = variables;
        config.source = Some(source);
        config.watched_files = watched_files;
        config
    }

    /// Re-parse the original source into a new snapshot.
    ///
    /// Returns `Ok(None)` for configurations assembled in code. With
    /// `keepVariablesOnReload`, variables set at runtime are seeded into
    /// the new snapshot before its own declarations are applied.
    pub fn reload(&self) -> Result<Option<LoggingConfiguration>> {
        let Some(source) = &self.source else {
            return Ok(None);
        };
        let kept = if self.keeps_variables_on_reload() {
            self.variables.runtime_variables()
        } else {
            Vec::new()
        };
        parser::parse(source, &self.env, kept)
            .map(Some)
            .map_err(|failure| failure.error)
    }

    pub fn keeps_variables_on_reload(&self) -> bool {
        self.settings.keep_variables_on_reload || self.env.options.keep_variables_on_reload
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> Option<&ConfigSource> {
        self.source.as_ref()
    }

    pub fn settings(&self) -> &ConfigSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ConfigSettings {
        &mut self.settings
    }

    pub fn environment(&self) -> &ConfigEnvironment {
        &self.env
    }

    pub fn internal_logger(&self) -> &Arc<InternalLogger> {
        &self.env.internal
    }

    /// Effective auto reload flag: the root document's own setting.
    pub fn auto_reload(&self) -> bool {
        self.settings.auto_reload
    }

    pub fn global_threshold(&self) -> LogLevel {
        self.settings.global_threshold
    }

    /// Every file read while building this snapshot, root first.
    pub fn watched_files(&self) -> &[WatchedFile] {
        &self.watched_files
    }

    pub fn variables(&self) -> &Arc<VariableMap> {
        &self.variables
    }

    /// Layout context bound to this snapshot's variables and registry.
    pub fn layout_context(&self) -> LayoutContext {
        LayoutContext::new(self.env.registry.clone())
            .with_variables(&self.variables)
            .with_time_source(self.settings.time_source)
            .with_internal(self.env.internal.clone())
    }

    pub fn target_context(&self) -> TargetContext {
        TargetContext::new(self.layout_context(), self.env.services.clone())
    }

    // -- targets --------------------------------------------------------

    /// Register `target` under its own name.
    pub fn add_target(&mut self, target: Arc<dyn Target>) {
        let key = target.name().to_string();
        self.add_target_with_name(&key, target);
    }

    /// Register `target` under `key`. An existing entry with the same key
    /// is replaced; the target keeps its own name.
    pub fn add_target_with_name(&mut self, key: &str, target: Arc<dyn Target>) {
        match self
            .targets
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some(entry) => entry.1 = target,
            None => self.targets.push((key.to_string(), target)),
        }
    }

    pub fn find_target_by_name(&self, key: &str) -> Option<Arc<dyn Target>> {
        self.targets
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, t)| t.clone())
    }

    /// Look a target up by key and downcast it.
    pub fn find_target<T: Target>(&self, key: &str) -> Option<Arc<T>> {
        self.find_target_by_name(key)
            .and_then(|target| downcast_target::<T>(&target))
    }

    /// Registered targets, then any target only reachable through a rule.
    pub fn all_targets(&self) -> Vec<Arc<dyn Target>> {
        let mut out: Vec<Arc<dyn Target>> = self.targets.iter().map(|(_, t)| t.clone()).collect();
        let mut from_rules = Vec::new();
        collect_rule_targets(&self.rules, &mut from_rules);
        for target in from_rules {
            if !out.iter().any(|t| same_target(t, &target)) {
                out.push(target);
            }
        }
        out
    }

    /// Unregister a target and drop it from every rule.
    pub fn remove_target(&mut self, key: &str) -> bool {
        let Some(target) = self.find_target_by_name(key) else {
            return false;
        };
        self.targets.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        remove_from_rules(&mut self.rules, target.name());
        true
    }

    /// Registered targets that no rule reaches, directly or through a
    /// wrapper or compound target.
    pub fn unused_targets(&self) -> Vec<Arc<dyn Target>> {
        let mut reachable = Vec::new();
        collect_rule_targets(&self.rules, &mut reachable);
        let mut stack = reachable.clone();
        while let Some(target) = stack.pop() {
            for inner in target.wrapped_targets() {
                if !reachable.iter().any(|t| same_target(t, &inner)) {
                    reachable.push(inner.clone());
                    stack.push(inner);
                }
            }
        }
        self.targets
            .iter()
            .map(|(_, t)| t)
            .filter(|t| !reachable.iter().any(|r| same_target(r, t)))
            .cloned()
            .collect()
    }

    // -- rules ----------------------------------------------------------

    pub fn rules(&self) -> &[LoggingRule] {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut Vec<LoggingRule> {
        &mut self.rules
    }

    /// Append a rule, registering any of its targets not yet known.
    pub fn add_rule(&mut self, rule: LoggingRule) {
        let mut targets = Vec::new();
        collect_rule_targets(std::slice::from_ref(&rule), &mut targets);
        for target in targets {
            if self.find_target_by_name(target.name()).is_none() {
                self.add_target(target);
            }
        }
        self.rules.push(rule);
    }

    pub fn add_rule_for_level(&mut self, level: LogLevel, target: Arc<dyn Target>, pattern: &str) {
        self.add_rule(LoggingRule::for_level(pattern, level, target));
    }

    pub fn add_rule_for_levels(
        &mut self,
        min: LogLevel,
        max: LogLevel,
        target: Arc<dyn Target>,
        pattern: &str,
    ) {
        self.add_rule(LoggingRule::for_range(pattern, min, max, target));
    }

    pub fn add_rule_for_all_levels(&mut self, target: Arc<dyn Target>, pattern: &str) {
        self.add_rule(LoggingRule::for_all_levels(pattern, target));
    }

    pub fn find_rule_by_name(&self, name: &str) -> Option<&LoggingRule> {
        find_rule(&self.rules, name)
    }

    /// Remove every top-level rule called `name`.
    pub fn remove_rule_by_name(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules
            .retain(|r| !r.name().is_some_and(|n| n.eq_ignore_ascii_case(name)));
        before != self.rules.len()
    }

    // -- target lifecycle -------------------------------------------------

    pub(crate) fn initialize_targets(&self) -> std::result::Result<(), TargetError> {
        for target in self.all_targets() {
            target.initialize()?;
        }
        Ok(())
    }

    pub fn flush_targets(&self) -> std::result::Result<(), TargetError> {
        let mut first_error = None;
        for target in self.all_targets() {
            if let Err(e) = target.flush() {
                self.env
                    .internal
                    .warn(format!("Failed to flush target '{}': {}", target.name(), e));
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop dispatch to this snapshot, wait for in-flight writes, then
    /// close every target not present in `keep`.
    pub(crate) fn retire(&self, keep: &[Arc<dyn Target>]) {
        {
            let mut open = self.gate.write().expect("dispatch gate lock poisoned");
            *open = false;
        }
        for target in self.all_targets() {
            if keep.iter().any(|k| same_target(k, &target)) {
                continue;
            }
            if let Err(e) = target.flush() {
                self.env
                    .internal
                    .warn(format!("Failed to flush target '{}': {}", target.name(), e));
            }
            target.close();
        }
    }

    pub fn is_retired(&self) -> bool {
        !*self.gate.read().expect("dispatch gate lock poisoned")
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoggingConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfiguration")
            .field("id", &self.id)
            .field("targets", &self.targets.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("rules", &self.rules.len())
            .field("source", &self.source)
            .finish()
    }
}

pub(crate) fn same_target(a: &Arc<dyn Target>, b: &Arc<dyn Target>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn collect_rule_targets(rules: &[LoggingRule], out: &mut Vec<Arc<dyn Target>>) {
    for rule in rules {
        for target in rule.targets() {
            if !out.iter().any(|t| same_target(t, target)) {
                out.push(target.clone());
            }
        }
        collect_rule_targets(rule.children(), out);
    }
}

fn remove_from_rules(rules: &mut [LoggingRule], name: &str) {
    for rule in rules {
        rule.remove_target(name);
        remove_from_rules(rule.children_mut(), name);
    }
}

fn find_rule<'a>(rules: &'a [LoggingRule], name: &str) -> Option<&'a LoggingRule> {
    rules.iter().find_map(|rule| {
        if rule.name().is_some_and(|n| n.eq_ignore_ascii_case(name)) {
            Some(rule)
        } else {
            find_rule(rule.children(), name)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::{MemoryTarget, NullTarget};

    fn memory(name: &str) -> Arc<dyn Target> {
        Arc::new(MemoryTarget::with_message_layout(name))
    }

    #[test]
    fn test_add_target_with_name_keeps_target_name() {
        let mut config = LoggingConfiguration::new();
        config.add_target_with_name("Key", memory("first"));
        config.add_target_with_name("KEY", memory("second"));

        let found = config.find_target_by_name("key").unwrap();
        assert_eq!(found.name(), "second");
        assert_eq!(config.all_targets().len(), 1);
        assert!(config.find_target_by_name("second").is_none());
    }

    #[test]
    fn test_find_target_is_type_checked() {
        let mut config = LoggingConfiguration::new();
        config.add_target(memory("mem"));
        assert!(config.find_target::<MemoryTarget>("mem").is_some());
        assert!(config.find_target::<NullTarget>("mem").is_none());
    }

    #[test]
    fn test_rules_register_their_targets() {
        let mut config = LoggingConfiguration::new();
        config.add_rule_for_level(LogLevel::Info, memory("m"), "*");
        config.add_rule(LoggingRule::for_all_levels("A.*", memory("n")).with_name("named"));

        assert_eq!(config.all_targets().len(), 2);
        assert!(config.find_rule_by_name("NAMED").is_some());
        assert!(config.remove_rule_by_name("named"));
        assert!(config.find_rule_by_name("named").is_none());
        assert!(!config.remove_rule_by_name("named"));
    }

    #[test]
    fn test_remove_target_detaches_from_rules() {
        let mut config = LoggingConfiguration::new();
        config.add_rule_for_all_levels(memory("m"), "*");
        assert!(config.remove_target("m"));
        assert!(config.rules()[0].targets().is_empty());
        assert!(config.all_targets().is_empty());
    }

    #[test]
    fn test_unused_targets_follow_wrappers() {
        use crate::targets::AutoFlushTargetWrapper;

        let inner = memory("inner");
        let wrapper: Arc<dyn Target> = Arc::new(AutoFlushTargetWrapper::new("outer", inner.clone()));
        let mut config = LoggingConfiguration::new();
        config.add_target(inner);
        config.add_target(memory("orphan"));
        config.add_rule_for_all_levels(wrapper, "*");

        let unused: Vec<String> = config
            .unused_targets()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(unused, vec!["orphan"]);
    }

    #[test]
    fn test_programmatic_config_does_not_reload() {
        let config = LoggingConfiguration::new();
        assert!(config.reload().unwrap().is_none());
    }

    #[test]
    fn test_retire_closes_only_unshared_targets() {
        let shared = Arc::new(MemoryTarget::with_message_layout("shared"));
        let dropped = Arc::new(MemoryTarget::with_message_layout("dropped"));
        let mut config = LoggingConfiguration::new();
        config.add_target(shared.clone());
        config.add_target(dropped.clone());

        let keep: Vec<Arc<dyn Target>> = vec![shared.clone()];
        config.retire(&keep);
        assert!(config.is_retired());
        assert!(!shared.is_closed());
        assert!(dropped.is_closed());
    }
}
