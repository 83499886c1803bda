//! Element tree to configuration snapshot.
//!
//! # Responsibilities
//! - Read root settings and apply internal-log settings immediately
//! - Apply the duplicate-attribute policy once strictness is known
//! - Declare variables, check extensions, pick the time source
//! - Build targets (plain, wrapper, compound, default wrappers, async)
//! - Build rules with levels, filters, targets and child rules
//! - Report targets no rule uses
//!
//! # Data Flow
//! ```text
//! LoadedSource ──▶ settings ──▶ variables ──▶ targets ──▶ rules ──▶ LoggingConfiguration
//! ```
//!
//! Sections are processed by kind, not document order, so rules may
//! reference targets declared later and includes may appear anywhere.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::configuration::{ConfigEnvironment, ConfigSource, LoggingConfiguration};
use crate::config::error::{ConfigError, Result};
use crate::config::loader::{self, LoadedSource};
use crate::config::settings::ConfigSettings;
use crate::config::variables::{Variable, VariableMap};
use crate::config::xml::XmlElement;
use crate::layout::parser::parse_bool;
use crate::layout::{compile_or_literal, LayoutContext, TimeSource};
use crate::level::LogLevel;
use crate::observability::internal::{InternalLogSettings, InternalLogger};
use crate::routing::filter::{Filter, FilterAction, FilterCondition};
use crate::routing::rule::{DynamicLevels, LoggingRule};
use crate::targets::{Target, TargetBuilder, TargetContext};

/// A failed parse, with the strictness in force when it failed.
#[derive(Debug)]
pub(crate) struct ParseFailure {
    pub error: ConfigError,
    pub strict: bool,
}

/// Parse `source`. `kept` are runtime variables carried over from the
/// previous snapshot; declarations in the source override them.
pub(crate) fn parse(
    source: &ConfigSource,
    env: &ConfigEnvironment,
    kept: Vec<Variable>,
) -> std::result::Result<LoggingConfiguration, ParseFailure> {
    let fail = |strict: bool| move |error: ConfigError| ParseFailure { error, strict };

    let loaded = match source {
        ConfigSource::File(path) => loader::load_file(path, &env.internal),
        ConfigSource::Text { text, base_dir } => {
            loader::load_text(text, base_dir.as_deref(), &env.internal)
        }
    }
    .map_err(fail(env.throws_config_exceptions()))?;

    let settings = read_settings(&loaded.root, env).map_err(fail(env.throws_config_exceptions()))?;
    let strict = settings.throw_config_exceptions_or(env.throws_config_exceptions());

    let variables = Arc::new(VariableMap::new());
    for variable in kept {
        variables.insert(&variable.name, variable.value, true);
    }

    let layout = LayoutContext::new(env.registry.clone())
        .with_variables(&variables)
        .with_time_source(settings.time_source)
        .strict(strict)
        .with_internal(env.internal.clone());

    let mut parser = Parser {
        internal: &env.internal,
        strict,
        targets: TargetContext::new(layout, env.services.clone()),
        variables: variables.clone(),
        registered: Vec::new(),
        default_wrapper: None,
        default_parameters: HashMap::new(),
    };
    let watched = loaded.watched.clone();
    let rules = parser.run(&loaded).map_err(fail(strict))?;

    let mut config =
        LoggingConfiguration::from_parts(env.clone(), parser.settings_with(settings), variables, source.clone(), watched);
    for (key, target) in parser.registered {
        config.add_target_with_name(&key, target);
    }
    *config.rules_mut() = rules;

    for target in config.unused_targets() {
        env.internal.warn(format!(
            "Unused target detected. Add a rule for this target to the configuration. TargetName: {}",
            target.name()
        ));
    }
    env.internal.info(format!(
        "Configuration loaded: {} target(s), {} rule(s)",
        config.all_targets().len(),
        config.rules().len()
    ));
    Ok(config)
}

fn flag(element: &XmlElement, name: &str) -> Result<Option<bool>> {
    element.attr(name).map(|v| parse_bool(name, v)).transpose()
}

fn read_settings(root: &XmlElement, env: &ConfigEnvironment) -> Result<ConfigSettings> {
    let mut settings = ConfigSettings {
        auto_reload: flag(root, "autoReload")?.unwrap_or(false),
        keep_variables_on_reload: flag(root, "keepVariablesOnReload")?.unwrap_or(false),
        throw_exceptions: flag(root, "throwExceptions")?,
        throw_config_exceptions: flag(root, "throwConfigExceptions")?,
        use_invariant_culture: flag(root, "useInvariantCulture")?.unwrap_or(false),
        ..ConfigSettings::default()
    };
    if let Some(level) = root.attr("globalThreshold") {
        settings.global_threshold = LogLevel::parse_lenient(level);
    }
    settings.internal_log = InternalLogSettings {
        level: root.attr("internalLogLevel").map(LogLevel::parse_lenient),
        file: root.attr("internalLogFile").map(Into::into),
        to_console: flag(root, "internalLogToConsole")?,
        to_console_error: flag(root, "internalLogToConsoleError")?,
        include_timestamp: flag(root, "internalLogIncludeTimestamp")?,
    };

    for (key, _) in root.attributes() {
        if !is_root_setting(key) {
            env.internal
                .debug(format!("Ignoring unknown root attribute '{}'", key));
        }
    }
    Ok(settings)
}

fn is_root_setting(key: &str) -> bool {
    const KNOWN: &[&str] = &[
        "autoReload",
        "keepVariablesOnReload",
        "throwExceptions",
        "throwConfigExceptions",
        "useInvariantCulture",
        "globalThreshold",
        "internalLogLevel",
        "internalLogFile",
        "internalLogToConsole",
        "internalLogToConsoleError",
        "internalLogIncludeTimestamp",
        "schemaLocation",
    ];
    KNOWN.iter().any(|k| k.eq_ignore_ascii_case(key))
}

struct Parser<'a> {
    internal: &'a InternalLogger,
    strict: bool,
    targets: TargetContext,
    variables: Arc<VariableMap>,
    registered: Vec<(String, Arc<dyn Target>)>,
    default_wrapper: Option<XmlElement>,
    default_parameters: HashMap<String, XmlElement>,
}

impl Parser<'_> {
    /// Strict: return the error. Lenient: log it and carry on.
    fn report(&self, error: ConfigError) -> Result<()> {
        if self.strict {
            return Err(error);
        }
        self.internal.warn(&error);
        Ok(())
    }

    fn settings_with(&self, mut settings: ConfigSettings) -> ConfigSettings {
        settings.time_source = self.targets.layout.time_source();
        settings
    }

    fn run(&mut self, loaded: &LoadedSource) -> Result<Vec<LoggingRule>> {
        for duplicate in &loaded.duplicates {
            if self.strict {
                return Err(ConfigError::DuplicateAttribute {
                    element: duplicate.element.clone(),
                    attribute: duplicate.attribute.clone(),
                });
            }
            self.internal.warn(duplicate.message());
        }

        for section in &loaded.sections {
            if section.is("time") {
                self.parse_time(section)?;
            } else if section.is("extensions") {
                self.parse_extensions(section)?;
            }
        }
        for section in &loaded.sections {
            if section.is("variable") {
                self.parse_variable(section)?;
            } else if section.is("variables") {
                for variable in section.children_named("variable") {
                    self.parse_variable(variable)?;
                }
            }
        }
        for section in loaded.sections.iter().filter(|s| s.is("targets")) {
            self.parse_targets(section)?;
        }

        let mut rules = Vec::new();
        for section in &loaded.sections {
            if section.is("rules") {
                for child in &section.children {
                    if !child.is("logger") {
                        self.internal
                            .warn(format!("Unrecognized element '{}' in rules", child.name));
                        continue;
                    }
                    if let Some(rule) = self.parse_rule(child)? {
                        rules.push(rule);
                    }
                }
            } else if !is_section(&section.name) {
                self.internal
                    .warn(format!("Unrecognized configuration element '{}'", section.name));
            }
        }
        Ok(rules)
    }

    // -- variables --------------------------------------------------------

    /// Replace `${name}` references to declared variables with their text.
    fn expand(&self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            let name = &after[..end];
            let simple = !name.is_empty()
                && !name.contains([':', '$', '{'])
                && self.variables.contains(name.trim());
            match self.variables.get(name.trim()).filter(|_| simple) {
                Some(value) => out.push_str(value.text()),
                None => out.push_str(&rest[start..start + 2 + end + 1]),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }

    fn attr(&self, element: &XmlElement, name: &str) -> Option<String> {
        element.attr(name).map(|v| self.expand(v))
    }

    fn parse_variable(&mut self, element: &XmlElement) -> Result<()> {
        let Some(name) = element.attr("name") else {
            return self.report(ConfigError::missing(&element.name, "name"));
        };
        let raw = match element.attr("value") {
            Some(value) => value.to_string(),
            None => element
                .children_named("value")
                .next()
                .map(|v| v.text.clone())
                .unwrap_or_else(|| element.text.clone()),
        };
        let text = self.expand(&raw);
        let value = compile_or_literal(&text, &self.targets.layout)?;
        self.variables.declare(name, value);
        Ok(())
    }

    // -- extensions and time ----------------------------------------------

    fn parse_extensions(&self, section: &XmlElement) -> Result<()> {
        for add in section.children_named("add") {
            let name = add
                .attr("type")
                .or_else(|| add.attr("assembly"))
                .or_else(|| add.attr("assemblyFile"));
            match name {
                Some(name) if self.targets.layout.registry().has_type(name) => {
                    self.internal.debug(format!("Extension '{}' is registered", name));
                }
                Some(name) if self.strict => {
                    return Err(ConfigError::UnknownType {
                        kind: "extension",
                        name: name.to_string(),
                    });
                }
                Some(name) => self
                    .internal
                    .warn(format!("Error loading extensions: {}", name)),
                None if add.attr("prefix").is_some() => {}
                None => self.report(ConfigError::missing("add", "type"))?,
            }
        }
        Ok(())
    }

    fn parse_time(&mut self, element: &XmlElement) -> Result<()> {
        let kind = element.required_attr("type")?.to_ascii_lowercase();
        let source = if kind.contains("utc") {
            TimeSource::Utc
        } else if kind.contains("local") {
            TimeSource::Local
        } else {
            return self.report(ConfigError::UnknownType {
                kind: "time source",
                name: kind,
            });
        };
        self.targets.layout = self.targets.layout.clone().with_time_source(source);
        Ok(())
    }

    // -- targets ----------------------------------------------------------

    fn parse_targets(&mut self, section: &XmlElement) -> Result<()> {
        let wrap_async = flag(section, "async")?.unwrap_or(false);
        for child in &section.children {
            if child.is("default-wrapper") {
                self.default_wrapper = Some(child.clone());
            } else if child.is("default-target-parameters") {
                match child.attr("type") {
                    Some(kind) => {
                        self.default_parameters
                            .insert(kind.to_ascii_lowercase(), child.clone());
                    }
                    None => self.report(ConfigError::missing(&child.name, "type"))?,
                }
            } else if is_target_element(child) {
                let Some(name) = child.attr("name").map(str::to_string) else {
                    self.report(ConfigError::missing(&child.name, "name"))?;
                    continue;
                };
                let mut layers = Vec::new();
                if let Some(wrapper) = &self.default_wrapper {
                    layers.push(wrapper.clone());
                }
                if wrap_async {
                    layers.push(XmlElement::new("wrapper-target").with_attribute("type", "AsyncWrapper"));
                }
                let inner_name = layers.iter().fold(name.clone(), |n, _| format!("{}_wrapped", n));
                let Some(mut target) = self.build_target(child, &inner_name)? else {
                    continue;
                };
                for (depth, layer) in layers.iter().enumerate() {
                    let layer_name = (depth + 1..layers.len()).fold(name.clone(), |n, _| format!("{}_wrapped", n));
                    match self.build_wrapper(layer, &layer_name, target.clone())? {
                        Some(wrapped) => target = wrapped,
                        None => break,
                    }
                }
                self.register(&name, target);
            } else {
                self.internal
                    .warn(format!("Unrecognized element '{}' in targets", child.name));
            }
        }
        Ok(())
    }

    fn register(&mut self, key: &str, target: Arc<dyn Target>) {
        match self
            .registered
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some(entry) => {
                self.internal
                    .debug(format!("Replacing target '{}' declared earlier", key));
                entry.1 = target;
            }
            None => self.registered.push((key.to_string(), target)),
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<dyn Target>> {
        self.registered
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, t)| t.clone())
    }

    fn builder(&self, element: &XmlElement, name: &str) -> Result<Option<Box<dyn TargetBuilder>>> {
        let Some(kind) = element.attr("type") else {
            self.report(ConfigError::missing(&element.name, "type"))?;
            return Ok(None);
        };
        match self.targets.layout.registry().target_builder(kind, name) {
            Some(builder) => Ok(Some(builder)),
            None => {
                self.report(ConfigError::UnknownType {
                    kind: "target",
                    name: kind.to_string(),
                })?;
                Ok(None)
            }
        }
    }

    fn set_property(
        &self,
        builder: &mut dyn TargetBuilder,
        kind: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let value = self.expand(value);
        if !builder.set_property(key, &value, &self.targets)? {
            self.report(ConfigError::invalid(
                key,
                &value,
                format!("unknown property for target type '{}'", kind),
            ))?;
        }
        Ok(())
    }

    fn build_target(&mut self, element: &XmlElement, name: &str) -> Result<Option<Arc<dyn Target>>> {
        let Some(mut builder) = self.builder(element, name)? else {
            return Ok(None);
        };
        let kind = element.attr("type").unwrap_or_default().to_string();

        if let Some(defaults) = self.default_parameters.get(&kind.to_ascii_lowercase()).cloned() {
            for (key, value) in defaults.attributes() {
                if !key.eq_ignore_ascii_case("type") {
                    self.set_property(builder.as_mut(), &kind, key, value)?;
                }
            }
        }
        for (key, value) in element.attributes() {
            if !key.eq_ignore_ascii_case("type") && !key.eq_ignore_ascii_case("name") {
                self.set_property(builder.as_mut(), &kind, key, value)?;
            }
        }

        for child in &element.children {
            if is_target_element(child) {
                let child_name = child
                    .attr("name")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}_{}", name, child.attr("type").unwrap_or("target")));
                let Some(inner) = self.build_target(child, &child_name)? else {
                    continue;
                };
                if child.attr("name").is_some() {
                    self.register(&child_name, inner.clone());
                }
                self.attach(builder.as_mut(), &kind, inner)?;
            } else if child.is("target-ref") {
                let Some(reference) = child.attr("name") else {
                    self.report(ConfigError::missing(&child.name, "name"))?;
                    continue;
                };
                match self.lookup(reference) {
                    Some(inner) => self.attach(builder.as_mut(), &kind, inner)?,
                    None => self.report(ConfigError::TargetNotFound(reference.to_string()))?,
                }
            } else if child.children.is_empty() {
                let value = child.attr("value").unwrap_or(&child.text).to_string();
                self.set_property(builder.as_mut(), &kind, &child.name, &value)?;
            } else {
                self.report(ConfigError::invalid(
                    &child.name,
                    "",
                    format!("nested property elements are not supported on '{}'", kind),
                ))?;
            }
        }

        builder.build(&self.targets).map(Some)
    }

    fn attach(&self, builder: &mut dyn TargetBuilder, kind: &str, inner: Arc<dyn Target>) -> Result<()> {
        if !builder.accepts_targets() {
            return self.report(ConfigError::invalid(
                "target",
                inner.name(),
                format!("target type '{}' does not wrap other targets", kind),
            ));
        }
        builder.add_target(inner)
    }

    fn build_wrapper(
        &self,
        layer: &XmlElement,
        name: &str,
        inner: Arc<dyn Target>,
    ) -> Result<Option<Arc<dyn Target>>> {
        let Some(mut builder) = self.builder(layer, name)? else {
            return Ok(None);
        };
        let kind = layer.attr("type").unwrap_or_default().to_string();
        for (key, value) in layer.attributes() {
            if !key.eq_ignore_ascii_case("type") && !key.eq_ignore_ascii_case("name") {
                self.set_property(builder.as_mut(), &kind, key, value)?;
            }
        }
        self.attach(builder.as_mut(), &kind, inner)?;
        builder.build(&self.targets).map(Some)
    }

    // -- rules ------------------------------------------------------------

    fn parse_rule(&self, element: &XmlElement) -> Result<Option<LoggingRule>> {
        if !flag(element, "enabled")?.unwrap_or(true) {
            self.internal.debug(format!(
                "Skipping disabled rule '{}'",
                element.attr("ruleName").or(element.attr("name")).unwrap_or("*")
            ));
            return Ok(None);
        }

        let rule_name = self.attr(element, "ruleName");
        let pattern = self.attr(element, "name");
        let write_to = self
            .attr(element, "writeTo")
            .or_else(|| self.attr(element, "appendTo"));
        let is_final = flag(element, "final")?.unwrap_or(false);
        let has_children = element.children_named("logger").next().is_some();
        if rule_name.is_none() && pattern.is_none() && write_to.is_none() && !is_final && !has_children {
            self.internal.debug("Skipping empty rule");
            return Ok(None);
        }

        let mut rule = LoggingRule::new(pattern.as_deref().unwrap_or("*"));
        rule.set_name(rule_name);
        rule.set_final(is_final);
        self.parse_levels(element, &mut rule)?;

        for name in write_to.iter().flat_map(|w| w.split(',')) {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match self.lookup(name) {
                Some(target) => {
                    rule.add_target(target);
                }
                None => self.report(ConfigError::TargetNotFound(name.to_string()))?,
            }
        }

        for child in &element.children {
            if child.is("filters") {
                self.parse_filters(child, &mut rule)?;
            } else if child.is("logger") {
                if let Some(nested) = self.parse_rule(child)? {
                    rule.add_child_rule(nested);
                }
            } else {
                self.internal
                    .warn(format!("Unrecognized element '{}' in logger rule", child.name));
            }
        }
        Ok(Some(rule))
    }

    fn parse_levels(&self, element: &XmlElement, rule: &mut LoggingRule) -> Result<()> {
        let level = self.attr(element, "level");
        let levels = self.attr(element, "levels");
        let min = self.attr(element, "minLevel");
        let max = self.attr(element, "maxLevel");

        if let Some(final_min) = self.attr(element, "finalMinLevel") {
            rule.set_final_min_level(Some(LogLevel::parse_lenient(&final_min)));
        }

        let dynamic = [&level, &levels, &min, &max]
            .iter()
            .any(|v| v.as_deref().is_some_and(|t| t.contains('{')));
        if dynamic {
            let compile = |text: &str| compile_or_literal(text, &self.targets.layout);
            let spec = match level.as_deref().or(levels.as_deref()) {
                Some(list) => DynamicLevels::List(compile(list)?),
                None => DynamicLevels::Range {
                    min: min.as_deref().map(compile).transpose()?,
                    max: max.as_deref().map(compile).transpose()?,
                },
            };
            rule.set_dynamic_levels(Some(spec));
            return Ok(());
        }

        if let Some(level) = &level {
            rule.enable_logging_for_level(LogLevel::parse_lenient(level));
        } else if let Some(levels) = &levels {
            for token in levels.split(',').filter(|t| !t.trim().is_empty()) {
                rule.enable_logging_for_level(LogLevel::parse_lenient(token));
            }
        } else if min.is_some() || max.is_some() {
            let min = min.as_deref().map_or(LogLevel::MIN, LogLevel::parse_lenient);
            let max = max.as_deref().map_or(LogLevel::MAX, LogLevel::parse_lenient);
            rule.enable_logging_for_levels(min, max);
        } else if rule.final_min_level().is_none() {
            rule.enable_logging_for_levels(LogLevel::MIN, LogLevel::MAX);
        }
        Ok(())
    }

    fn parse_filters(&self, element: &XmlElement, rule: &mut LoggingRule) -> Result<()> {
        if let Some(action) = element.attr("defaultAction") {
            match action.parse::<FilterAction>() {
                Ok(action) => rule.set_default_filter_action(action),
                Err(e) => self.report(ConfigError::invalid("defaultAction", action, e))?,
            }
        }
        for child in &element.children {
            let operand_key = FilterCondition::operand_attribute(&child.name);
            let operand = self.attr(child, operand_key).unwrap_or_default();
            let Some(condition) = FilterCondition::from_element(&child.name, operand) else {
                self.report(ConfigError::UnknownType {
                    kind: "filter",
                    name: child.name.clone(),
                })?;
                continue;
            };
            let Some(layout) = self.attr(child, "layout") else {
                self.report(ConfigError::missing(&child.name, "layout"))?;
                continue;
            };
            let layout = compile_or_literal(&layout, &self.targets.layout)?;
            let action = match child.attr("action") {
                Some(text) => match text.parse::<FilterAction>() {
                    Ok(action) => action,
                    Err(e) => {
                        self.report(ConfigError::invalid("action", text, e))?;
                        continue;
                    }
                },
                None => FilterAction::Neutral,
            };
            let ignore_case = flag(child, "ignoreCase")?.unwrap_or(false);
            rule.add_filter(Filter::new(condition, layout, action).ignore_case(ignore_case));
        }
        Ok(())
    }
}

fn is_target_element(element: &XmlElement) -> bool {
    element.is("target") || element.is("wrapper-target") || element.is("compound-target")
}

fn is_section(name: &str) -> bool {
    ["targets", "rules", "variables", "variable", "extensions", "time"]
        .iter()
        .any(|s| s.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::LogFactoryOptions;
    use crate::event::LogEvent;
    use crate::targets::{AsyncTargetWrapper, MemoryTarget, SplitGroupTarget};

    fn env() -> ConfigEnvironment {
        let env = ConfigEnvironment::new(LogFactoryOptions {
            internal_log_level: LogLevel::Debug,
            ..Default::default()
        });
        env.internal.start_capture();
        env
    }

    fn parse_text(text: &str, env: &ConfigEnvironment) -> std::result::Result<LoggingConfiguration, ParseFailure> {
        let source = ConfigSource::Text {
            text: text.to_string(),
            base_dir: None,
        };
        parse(&source, env, Vec::new())
    }

    #[test]
    fn test_rules_may_precede_targets() {
        let env = env();
        let config = parse_text(
            "<nlog>
               <rules><logger name='*' minlevel='Info' writeTo='d1'/></rules>
               <targets><target type='Memory' name='d1' layout='${message}'/></targets>
             </nlog>",
            &env,
        )
        .unwrap();
        assert_eq!(config.rules().len(), 1);
        assert_eq!(config.rules()[0].targets()[0].name(), "d1");
        assert_eq!(
            config.rules()[0].levels(),
            vec![LogLevel::Info, LogLevel::Warn, LogLevel::Error, LogLevel::Fatal]
        );
    }

    #[test]
    fn test_level_lists_keep_duplicates_and_garbage_is_off() {
        let env = env();
        let config = parse_text(
            "<nlog>
               <targets><target type='Null' name='n'/></targets>
               <rules>
                 <logger name='a' levels='Error,Error' writeTo='n'/>
                 <logger name='b' minlevel='Wrong' writeTo='n'/>
                 <logger name='c' writeTo='n'/>
               </rules>
             </nlog>",
            &env,
        )
        .unwrap();
        assert_eq!(config.rules()[0].levels(), vec![LogLevel::Error, LogLevel::Error]);
        assert!(config.rules()[1].levels().is_empty());
        assert_eq!(config.rules()[2].levels().len(), 6);
    }

    #[test]
    fn test_simple_variables_expand_into_layouts() {
        let env = env();
        let config = parse_text(
            "<nlog>
               <variable name='prefix' value='[['/>
               <variable name='suffix' value=']]'/>
               <targets><target type='Memory' name='m' layout='${prefix}${message}${suffix}'/></targets>
               <rules><logger name='*' writeTo='m'/></rules>
             </nlog>",
            &env,
        )
        .unwrap();
        let memory = config.find_target::<MemoryTarget>("m").unwrap();
        assert_eq!(memory.layout().node_count(), 3);
        assert_eq!(
            memory.layout().render_string(&LogEvent::new(LogLevel::Info, "x", "msg")),
            "[[msg]]"
        );
    }

    #[test]
    fn test_kept_runtime_variable_loses_to_declaration() {
        let env = env();
        let kept = vec![
            Variable {
                name: "var2".into(),
                value: "old".into(),
                runtime: true,
            },
            Variable {
                name: "var3".into(),
                value: "runtime".into(),
                runtime: true,
            },
        ];
        let source = ConfigSource::Text {
            text: "<nlog><variable name='var2' value='new'/></nlog>".into(),
            base_dir: None,
        };
        let config = parse(&source, &env, kept).unwrap();
        assert_eq!(config.variables().get("var2").unwrap().text(), "new");
        assert_eq!(config.variables().get("var3").unwrap().text(), "runtime");
    }

    #[test]
    fn test_duplicate_attribute_is_reported() {
        let env = env();
        parse_text("<nlog><variable name='a' value='1' value='2'/></nlog>", &env).unwrap();
        assert!(env.internal.captured_text().contains(
            "Skipping Duplicate value for 'variable'. PropertyName=value. Skips Value=2. Existing Value=1"
        ));

        let failure = parse_text(
            "<nlog throwConfigExceptions='true'><variable name='a' value='1' value='2'/></nlog>",
            &env,
        )
        .unwrap_err();
        assert!(failure.strict);
        assert!(matches!(failure.error, ConfigError::DuplicateAttribute { .. }));
    }

    #[test]
    fn test_unused_target_warning() {
        let env = env();
        parse_text(
            "<nlog><targets><target type='Null' name='lonely'/></targets></nlog>",
            &env,
        )
        .unwrap();
        assert!(env.internal.captured_text().contains(
            "Unused target detected. Add a rule for this target to the configuration. TargetName: lonely"
        ));
    }

    #[test]
    fn test_compound_target_children_count_as_used() {
        let env = env();
        let config = parse_text(
            "<nlog>
               <targets>
                 <target type='Memory' name='a'/>
                 <compound-target type='SplitGroup' name='split'>
                   <target-ref name='a'/>
                   <target type='Memory' name='b'/>
                 </compound-target>
               </targets>
               <rules><logger name='*' writeTo='split'/></rules>
             </nlog>",
            &env,
        )
        .unwrap();
        assert!(config.unused_targets().is_empty());
        assert!(config.find_target::<SplitGroupTarget>("split").is_some());
        assert!(config.find_target::<MemoryTarget>("b").is_some());
        assert!(!env.internal.captured_text().contains("Unused target"));
    }

    #[test]
    fn test_async_section_wraps_targets() {
        let env = env();
        let config = parse_text(
            "<nlog>
               <targets async='true'><target type='Memory' name='m'/></targets>
               <rules><logger name='*' writeTo='m'/></rules>
             </nlog>",
            &env,
        )
        .unwrap();
        let wrapper = config.find_target::<AsyncTargetWrapper>("m").unwrap();
        assert_eq!(wrapper.wrapped_targets()[0].name(), "m_wrapped");
        config.retire(&[]);
    }

    #[test]
    fn test_missing_target_is_lenient_unless_strict() {
        let env = env();
        let config = parse_text("<nlog><rules><logger name='*' writeTo='ghost'/></rules></nlog>", &env).unwrap();
        assert!(config.rules()[0].targets().is_empty());

        let failure = parse_text(
            "<nlog throwExceptions='true'><rules><logger name='*' writeTo='ghost'/></rules></nlog>",
            &env,
        )
        .unwrap_err();
        assert!(matches!(failure.error, ConfigError::TargetNotFound(ref n) if n == "ghost"));
    }

    #[test]
    fn test_unknown_extension_is_diagnosed() {
        let env = env();
        parse_text("<nlog><extensions><add assembly='Missing.Plugin'/></extensions></nlog>", &env).unwrap();
        assert!(env.internal.captured_text().contains("Error loading extensions"));
    }

    #[test]
    fn test_disabled_and_child_rules() {
        let env = env();
        let config = parse_text(
            "<nlog>
               <targets><target type='Null' name='n'/></targets>
               <rules>
                 <logger name='*' writeTo='n' enabled='false'/>
                 <logger name='App.*' ruleName='parent'>
                   <logger name='App.Db' level='Warn' writeTo='n'/>
                 </logger>
               </rules>
             </nlog>",
            &env,
        )
        .unwrap();
        assert_eq!(config.rules().len(), 1);
        let parent = config.find_rule_by_name("parent").unwrap();
        assert_eq!(parent.children().len(), 1);
        assert_eq!(parent.children()[0].levels(), vec![LogLevel::Warn]);
    }

    #[test]
    fn test_dynamic_levels_follow_variable() {
        let env = env();
        let config = parse_text(
            "<nlog>
               <variable name='lvl' value='Warn'/>
               <targets><target type='Null' name='n'/></targets>
               <rules><logger name='*' minlevel='${var:lvl}' writeTo='n'/></rules>
             </nlog>",
            &env,
        )
        .unwrap();
        let rule = &config.rules()[0];
        assert!(!rule.is_logging_enabled_for_level(LogLevel::Info));
        config.variables().set_text("lvl", "Debug");
        assert!(rule.is_logging_enabled_for_level(LogLevel::Info));
    }

    #[test]
    fn test_filters_are_parsed() {
        let env = env();
        let config = parse_text(
            "<nlog>
               <targets><target type='Null' name='n'/></targets>
               <rules>
                 <logger name='*' writeTo='n'>
                   <filters defaultAction='Ignore'>
                     <whenContains layout='${message}' substring='keep' action='Log'/>
                   </filters>
                 </logger>
               </rules>
             </nlog>",
            &env,
        )
        .unwrap();
        let filters = config.rules()[0].filters();
        assert_eq!(filters.default_action(), FilterAction::Ignore);
        assert_eq!(filters.filters().len(), 1);
        let kept = LogEvent::new(LogLevel::Info, "a", "please keep me");
        assert_eq!(filters.decide(&kept), FilterAction::Log);
    }

    #[test]
    fn test_time_element_sets_utc() {
        let env = env();
        let config = parse_text("<nlog><time type='AccurateUTC'/></nlog>", &env).unwrap();
        assert_eq!(config.settings().time_source, TimeSource::Utc);
    }
}
