//! The binding orchestrator.
//!
//! # Responsibilities
//! - Own the active `LoggingConfiguration` behind an atomic pointer
//! - Hand out cached `Logger`s and re-bind them on every swap
//! - Retire old targets only after the swap, once in-flight writes end
//! - Publish change and reload notifications to observers
//! - Drive automatic reload through `ConfigWatcher`
//!
//! # Data Flow
//! ```text
//! load / reload ──▶ LoggingConfiguration ──▶ initialize targets
//!                                              │
//!                                              ▼
//!                               ArcSwap store ──▶ re-bind loggers
//!                                              │
//!                                              ▼
//!                      close old gate ──▶ close old targets ──▶ notify
//! ```
//!
//! # Design Decisions
//! - No process-wide singleton; each factory is independent
//! - Swaps are serialized by a mutex; readers never take it
//! - Loggers hold a weak reference back so a logger that races a swap
//!   can re-bind itself

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::configuration::{ConfigEnvironment, LoggingConfiguration};
use crate::config::error::{ConfigError, LogError, Result, TargetError};
use crate::config::registry::Registry;
use crate::config::services::ServiceRepository;
use crate::config::settings::LogFactoryOptions;
use crate::config::watcher::ConfigWatcher;
use crate::event::LogEvent;
use crate::level::LogLevel;
use crate::lifecycle::Shutdown;
use crate::observability::internal::InternalLogger;
use crate::observability::metrics;
use crate::routing::chain::{LevelChains, TargetChain};
use crate::targets::Target;

const MAX_DISPATCH_ATTEMPTS: usize = 4;

/// Published to observers after a swap or a reload attempt.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    Changed {
        activated: Option<Arc<LoggingConfiguration>>,
        deactivated: Option<Arc<LoggingConfiguration>>,
    },
    Reloaded {
        succeeded: bool,
        error: Option<String>,
    },
}

pub type Observer = dyn Fn(&ConfigEvent) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub struct LogFactory {
    env: ConfigEnvironment,
    current: ArcSwapOption<LoggingConfiguration>,
    loggers: DashMap<String, Arc<Logger>>,
    observers: Mutex<Vec<(ObserverId, Arc<Observer>)>>,
    next_observer: AtomicU64,
    swap_lock: Mutex<()>,
    watcher: Mutex<Option<ConfigWatcher>>,
    shutdown: Shutdown,
    this: Weak<LogFactory>,
}

impl LogFactory {
    pub fn new(options: LogFactoryOptions) -> Arc<Self> {
        Self::with_environment(ConfigEnvironment::new(options))
    }

    pub fn with_environment(env: ConfigEnvironment) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            env,
            current: ArcSwapOption::empty(),
            loggers: DashMap::new(),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            swap_lock: Mutex::new(()),
            watcher: Mutex::new(None),
            shutdown: Shutdown::new(),
            this: this.clone(),
        })
    }

    pub fn environment(&self) -> &ConfigEnvironment {
        &self.env
    }

    pub fn options(&self) -> &LogFactoryOptions {
        &self.env.options
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.env.registry
    }

    pub fn services(&self) -> &Arc<ServiceRepository> {
        &self.env.services
    }

    pub fn internal_logger(&self) -> &Arc<InternalLogger> {
        &self.env.internal
    }

    pub fn configuration(&self) -> Option<Arc<LoggingConfiguration>> {
        self.current.load_full()
    }

    /// A blank configuration sharing this factory's registry and services.
    pub fn new_configuration(&self) -> LoggingConfiguration {
        LoggingConfiguration::with_environment(self.env.clone())
    }

    // -- loading ----------------------------------------------------------

    pub fn load_configuration(&self, path: &Path) -> Result<Arc<LoggingConfiguration>> {
        let config = Arc::new(LoggingConfiguration::load_file(path, self.env.clone())?);
        tracing::info!(path = %path.display(), config_id = %config.id(), "Configuration loaded");
        self.activate_locked(Some(config.clone()))?;
        Ok(config)
    }

    pub fn load_configuration_from_str(
        &self,
        text: &str,
        base_dir: Option<&Path>,
    ) -> Result<Arc<LoggingConfiguration>> {
        let config = Arc::new(LoggingConfiguration::load_str(text, base_dir, self.env.clone())?);
        self.activate_locked(Some(config.clone()))?;
        Ok(config)
    }

    /// Activate `config` (or none), closing the previous one's targets.
    pub fn set_configuration(&self, config: Option<LoggingConfiguration>) -> Result<()> {
        self.activate_locked(config.map(Arc::new))
    }

    /// Re-parse the active configuration's source and activate the result.
    ///
    /// Returns `Ok(false)` when there is nothing to reload. On failure the
    /// active configuration stays in place.
    pub fn reload_configuration(&self) -> Result<bool> {
        match self.reload_if(|_| true) {
            Some(Ok(true)) => {
                metrics::record_reload("manual", "ok");
                self.notify(&ConfigEvent::Reloaded {
                    succeeded: true,
                    error: None,
                });
                Ok(true)
            }
            Some(Ok(false)) | None => {
                metrics::record_reload("manual", "skipped");
                Ok(false)
            }
            Some(Err(e)) => {
                self.env.internal.error(format!("Configuration reload failed: {}", e));
                metrics::record_reload("manual", "error");
                self.notify(&ConfigEvent::Reloaded {
                    succeeded: false,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Watcher entry point: reload if `trigger` is still active. Errors
    /// are reported, never returned.
    pub(crate) fn reload_from_watch(&self, trigger: Uuid) {
        match self.reload_if(|current| current.id() == trigger) {
            None => {
                tracing::debug!(config_id = %trigger, "Configuration replaced before reload, skipping");
                metrics::record_reload("watch", "skipped");
            }
            Some(Ok(reloaded)) => {
                metrics::record_reload("watch", if reloaded { "ok" } else { "skipped" });
                self.notify(&ConfigEvent::Reloaded {
                    succeeded: reloaded,
                    error: None,
                });
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Automatic reload failed, keeping current configuration");
                self.env.internal.error(format!(
                    "Automatic reload failed, keeping current configuration: {}",
                    e
                ));
                metrics::record_reload("watch", "error");
                self.notify(&ConfigEvent::Reloaded {
                    succeeded: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    /// Reload the active configuration when `accept` agrees. `None` when
    /// there is no active configuration or it was refused. Observers of
    /// the swap run after the swap lock is released.
    fn reload_if(&self, accept: impl FnOnce(&LoggingConfiguration) -> bool) -> Option<Result<bool>> {
        let (outcome, changed) = {
            let _guard = self.swap_lock.lock().expect("configuration swap lock poisoned");
            let current = self.configuration().filter(|c| accept(c))?;
            match current.reload() {
                Ok(Some(next)) => match self.activate(Some(Arc::new(next))) {
                    Ok(changed) => (Ok(true), changed),
                    Err(e) => (Err(e), None),
                },
                Ok(None) => (Ok(false), None),
                Err(e) => (Err(e), None),
            }
        };
        if let Some(event) = changed {
            self.notify(&event);
        }
        Some(outcome)
    }

    fn activate_locked(&self, config: Option<Arc<LoggingConfiguration>>) -> Result<()> {
        let changed = {
            let _guard = self.swap_lock.lock().expect("configuration swap lock poisoned");
            self.activate(config)?
        };
        if let Some(event) = changed {
            self.notify(&event);
        }
        Ok(())
    }

    /// Caller holds `swap_lock` and publishes the returned event once it
    /// has let go of it.
    fn activate(&self, config: Option<Arc<LoggingConfiguration>>) -> Result<Option<ConfigEvent>> {
        if let Some(config) = &config {
            if let Err(e) = config.initialize_targets() {
                self.env
                    .internal
                    .error(format!("Failed to initialize targets: {}", e));
                if config.settings().throw_exceptions_or(self.env.options.throw_exceptions) {
                    return Err(ConfigError::Target(e));
                }
            }
        }

        let previous = self.current.swap(config.clone());
        if let (Some(old), Some(new)) = (&previous, &config) {
            if Arc::ptr_eq(old, new) {
                return Ok(None);
            }
        }
        if let Some(config) = &config {
            self.env.internal.configure(&config.settings().internal_log);
        }
        self.rebind_loggers();

        if let Some(old) = &previous {
            let keep = config.as_ref().map(|c| c.all_targets()).unwrap_or_default();
            old.retire(&keep);
        }
        self.sync_watcher(config.as_deref());

        let target_count = config.as_ref().map_or(0, |c| c.all_targets().len());
        metrics::record_swap(target_count);
        tracing::info!(
            config_id = ?config.as_ref().map(|c| c.id()),
            targets = target_count,
            "Configuration activated"
        );
        Ok(Some(ConfigEvent::Changed {
            activated: config,
            deactivated: previous,
        }))
    }

    fn sync_watcher(&self, config: Option<&LoggingConfiguration>) {
        let files = config.map(|c| c.watched_files().to_vec()).unwrap_or_default();
        let wants_watch = files.iter().any(|f| f.auto_reload);
        let mut slot = self.watcher.lock().expect("watcher lock poisoned");

        if slot.is_none() && wants_watch {
            if self.shutdown.is_triggered() {
                tracing::debug!("Factory is shut down, not watching configuration files");
                return;
            }
            match ConfigWatcher::start(self.this.clone(), self.env.options.debounce(), self.shutdown.clone()) {
                Ok(watcher) => *slot = Some(watcher),
                Err(e) => {
                    self.env
                        .internal
                        .error(format!("Failed to start configuration watcher: {}", e));
                    return;
                }
            }
        }
        if let Some(watcher) = slot.as_ref() {
            watcher.update(&files);
        }
    }

    /// Files the watcher currently observes.
    pub fn watched_files(&self) -> Vec<crate::config::loader::WatchedFile> {
        self.watcher
            .lock()
            .expect("watcher lock poisoned")
            .as_ref()
            .map(ConfigWatcher::watched_files)
            .unwrap_or_default()
    }

    // -- loggers ----------------------------------------------------------

    pub fn get_logger(&self, name: &str) -> Arc<Logger> {
        if let Some(logger) = self.loggers.get(name) {
            return logger.clone();
        }
        let logger = self
            .loggers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Logger {
                    name: name.to_string(),
                    state: ArcSwap::from_pointee(self.state_for(name)),
                    factory: self.this.clone(),
                    internal: self.env.internal.clone(),
                })
            })
            .clone();
        metrics::record_logger_cache_size(self.loggers.len());
        logger
    }

    fn state_for(&self, name: &str) -> LoggerState {
        let config = self.configuration();
        let chains = config
            .as_ref()
            .map(|c| LevelChains::build(name, c.rules(), c.global_threshold()))
            .unwrap_or_default();
        let throw_exceptions = config
            .as_ref()
            .map_or(self.env.options.throw_exceptions, |c| {
                c.settings().throw_exceptions_or(self.env.options.throw_exceptions)
            });
        LoggerState {
            config,
            chains,
            throw_exceptions,
        }
    }

    fn rebind(&self, logger: &Logger) {
        logger.state.store(Arc::new(self.state_for(&logger.name)));
    }

    fn rebind_loggers(&self) {
        for entry in self.loggers.iter() {
            self.rebind(entry.value());
        }
    }

    /// Recompute every logger's target chains against the active rules,
    /// re-evaluating level expressions.
    pub fn reconfigure_existing_loggers(&self) {
        let _guard = self.swap_lock.lock().expect("configuration swap lock poisoned");
        self.rebind_loggers();
    }

    pub fn flush(&self) -> std::result::Result<(), TargetError> {
        match self.configuration() {
            Some(config) => config.flush_targets(),
            None => Ok(()),
        }
    }

    /// Stop watching, flush and close every target.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        if let Some(watcher) = self.watcher.lock().expect("watcher lock poisoned").take() {
            watcher.stop();
        }
        if let Err(e) = self.activate_locked(None) {
            self.env.internal.error(format!("Shutdown failed: {}", e));
        }
    }

    // -- observers --------------------------------------------------------

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .expect("observer lock poisoned")
            .push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock().expect("observer lock poisoned");
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        before != observers.len()
    }

    fn notify(&self, event: &ConfigEvent) {
        let observers: Vec<Arc<Observer>> = self
            .observers
            .lock()
            .expect("observer lock poisoned")
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }
}

impl fmt::Debug for LogFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogFactory")
            .field("configuration", &self.configuration().map(|c| c.id()))
            .field("loggers", &self.loggers.len())
            .finish()
    }
}

struct LoggerState {
    config: Option<Arc<LoggingConfiguration>>,
    chains: LevelChains,
    throw_exceptions: bool,
}

/// A named entry point bound to the factory's active configuration.
pub struct Logger {
    name: String,
    state: ArcSwap<LoggerState>,
    factory: Weak<LogFactory>,
    internal: Arc<InternalLogger>,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.state.load().chains.is_enabled(level)
    }

    /// Targets that would receive an event at `level`, in order.
    pub fn targets_for(&self, level: LogLevel) -> Vec<Arc<dyn Target>> {
        self.state
            .load()
            .chains
            .for_level(level)
            .map(TargetChain::targets)
            .unwrap_or_default()
    }

    /// Log, swallowing failures. They are reported to the internal logger.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let _ = self.try_log_event(LogEvent::new(level, self.name.clone(), message));
    }

    pub fn log_event(&self, event: LogEvent) {
        let _ = self.try_log_event(event);
    }

    /// Log, returning target failures when `throwExceptions` is on.
    pub fn try_log(&self, level: LogLevel, message: impl Into<String>) -> std::result::Result<(), LogError> {
        self.try_log_event(LogEvent::new(level, self.name.clone(), message))
    }

    pub fn try_log_event(&self, event: LogEvent) -> std::result::Result<(), LogError> {
        let event = Arc::new(event);
        for _ in 0..MAX_DISPATCH_ATTEMPTS {
            let state = self.state.load_full();
            let Some(config) = &state.config else {
                return Ok(());
            };
            let Some(chain) = state.chains.for_level(event.level()) else {
                return Ok(());
            };
            if chain.is_empty() {
                return Ok(());
            }

            let open = config.gate.read().expect("dispatch gate lock poisoned");
            if !*open {
                drop(open);
                if let Some(factory) = self.factory.upgrade() {
                    factory.rebind(self);
                }
                continue;
            }
            return self.dispatch(chain, &event, state.throw_exceptions);
        }
        Ok(())
    }

    fn dispatch(
        &self,
        chain: &TargetChain,
        event: &Arc<LogEvent>,
        throw_exceptions: bool,
    ) -> std::result::Result<(), LogError> {
        for link in chain.links() {
            if !link.decide(event).allows() {
                continue;
            }
            for target in link.targets() {
                if let Err(e) = target.write(event) {
                    self.internal.error(format!(
                        "Target '{}' failed to write event for logger '{}': {}",
                        target.name(),
                        self.name,
                        e
                    ));
                    if throw_exceptions {
                        return Err(LogError::Target {
                            logger: self.name.clone(),
                            level: event.level(),
                            source: e,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogLevel::Fatal, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::MemoryTarget;

    fn factory() -> Arc<LogFactory> {
        LogFactory::new(LogFactoryOptions::default())
    }

    #[test]
    fn test_loggers_are_cached_per_name() {
        let factory = factory();
        let a = factory.get_logger("A");
        assert!(Arc::ptr_eq(&a, &factory.get_logger("A")));
        assert!(!Arc::ptr_eq(&a, &factory.get_logger("B")));
    }

    #[test]
    fn test_swap_rebinds_loggers_and_closes_old_targets() {
        let factory = factory();
        let first = Arc::new(MemoryTarget::with_message_layout("first"));
        let mut config = factory.new_configuration();
        config.add_rule_for_all_levels(first.clone(), "*");
        factory.set_configuration(Some(config)).unwrap();

        let logger = factory.get_logger("App");
        logger.info("one");
        assert_eq!(first.logs(), vec!["one"]);

        let second = Arc::new(MemoryTarget::with_message_layout("second"));
        let mut config = factory.new_configuration();
        config.add_rule_for_all_levels(second.clone(), "*");
        factory.set_configuration(Some(config)).unwrap();

        logger.info("two");
        assert_eq!(first.logs(), vec!["one"]);
        assert!(first.is_closed());
        assert_eq!(second.logs(), vec!["two"]);
    }

    #[test]
    fn test_shared_target_survives_swap() {
        let factory = factory();
        let shared = Arc::new(MemoryTarget::with_message_layout("shared"));
        for _ in 0..2 {
            let mut config = factory.new_configuration();
            config.add_rule_for_all_levels(shared.clone(), "*");
            factory.set_configuration(Some(config)).unwrap();
        }
        assert!(!shared.is_closed());
    }

    #[test]
    fn test_observers_see_activation() {
        let factory = factory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = factory.subscribe(move |event| {
            if let ConfigEvent::Changed { activated, deactivated } = event {
                sink.lock().unwrap().push((activated.is_some(), deactivated.is_some()));
            }
        });

        factory.set_configuration(Some(factory.new_configuration())).unwrap();
        factory.set_configuration(None).unwrap();
        assert!(factory.unsubscribe(id));
        factory.set_configuration(Some(factory.new_configuration())).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(true, false), (false, true)]);
    }

    #[test]
    fn test_observer_may_reload_from_its_callback() {
        let factory = factory();
        let weak = Arc::downgrade(&factory);
        let reloads = Arc::new(AtomicU64::new(0));
        let counter = reloads.clone();
        factory.subscribe(move |event| {
            if !matches!(event, ConfigEvent::Changed { activated: Some(_), .. }) {
                return;
            }
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(factory) = weak.upgrade() {
                    factory.reload_configuration().unwrap();
                    factory.reconfigure_existing_loggers();
                }
            }
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = factory.clone();
        std::thread::spawn(move || {
            let result = worker.load_configuration_from_str(
                "<nlog><targets><target type='Null' name='n'/></targets></nlog>",
                None,
            );
            let _ = done_tx.send(result.is_ok());
        });

        let finished = done_rx.recv_timeout(std::time::Duration::from_secs(5));
        assert_eq!(finished, Ok(true), "activation blocked on its own observer");
        assert_eq!(reloads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reconfigure_picks_up_variable_levels() {
        let factory = factory();
        factory
            .load_configuration_from_str(
                "<nlog>
                   <variable name='lvl' value='Error'/>
                   <targets><target type='Memory' name='m' layout='${message}'/></targets>
                   <rules><logger name='*' minlevel='${var:lvl}' writeTo='m'/></rules>
                 </nlog>",
                None,
            )
            .unwrap();
        let logger = factory.get_logger("A");
        assert!(!logger.is_enabled(LogLevel::Info));

        let config = factory.configuration().unwrap();
        config.variables().set_text("lvl", "Info");
        assert!(!logger.is_enabled(LogLevel::Info));
        factory.reconfigure_existing_loggers();
        assert!(logger.is_enabled(LogLevel::Info));
    }

    #[test]
    fn test_global_threshold_blocks_low_levels() {
        let factory = factory();
        let config = factory
            .load_configuration_from_str(
                "<nlog globalThreshold='Warn'>
                   <targets><target type='Memory' name='m' layout='${message}'/></targets>
                   <rules><logger name='*' writeTo='m'/></rules>
                 </nlog>",
                None,
            )
            .unwrap();
        let logger = factory.get_logger("A");
        logger.info("dropped");
        logger.error("kept");
        let memory = config.find_target::<MemoryTarget>("m").unwrap();
        assert_eq!(memory.logs(), vec!["kept"]);
    }

    #[test]
    fn test_text_configuration_reloads_from_retained_text() {
        let factory = factory();
        let first = factory
            .load_configuration_from_str(
                "<nlog><targets><target type='Null' name='n'/></targets></nlog>",
                None,
            )
            .unwrap();
        assert!(factory.reload_configuration().unwrap());
        let second = factory.configuration().unwrap();
        assert_ne!(first.id(), second.id());
        assert!(first.is_retired());
        assert_eq!(second.all_targets().len(), 1);
    }
}
