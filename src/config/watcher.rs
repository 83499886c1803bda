//! Configuration file watcher for automatic reload.
//!
//! # Responsibilities
//! - Watch the directories holding every configuration file
//! - Forward relevant changes to a debounce task
//! - After a quiet period, ask the factory to reload once
//!
//! # Design Decisions
//! - Directories are watched rather than files, so a rename or a
//!   delete-then-recreate of the file is seen like an in-place edit
//! - Files whose `autoReload` is off are observed but never trigger
//! - The reload runs on the blocking pool and only applies if the
//!   configuration that saw the change is still the active one
//! - Without a caller runtime the watcher brings its own single worker
//!   thread, which shuts down with the watcher

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::error::Result;
use crate::config::loader::{normalize_path, WatchedFile};
use crate::factory::LogFactory;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::observability::metrics;

/// A change to one watched file.
#[derive(Debug, Clone)]
struct FileChange {
    path: PathBuf,
    kind: EventKind,
}

pub struct ConfigWatcher {
    files: Arc<Mutex<Vec<WatchedFile>>>,
    watcher: Mutex<RecommendedWatcher>,
    directories: Mutex<HashSet<PathBuf>>,
    shutdown: Shutdown,
    task: JoinHandle<()>,
    // after `task`, so the debounce loop is aborted first
    runtime: Option<OwnedRuntime>,
}

/// Runtime the watcher started for itself.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // may run on one of its own blocking threads after a reload
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl ConfigWatcher {
    /// Start watching. The debounce task runs on the current tokio
    /// runtime when there is one, otherwise on a runtime owned by the
    /// watcher. Reloads go to `factory` until it is dropped or `shutdown`
    /// fires.
    pub fn start(factory: Weak<LogFactory>, debounce: Duration, shutdown: Shutdown) -> Result<Self> {
        let (handle, runtime) = match Handle::try_current() {
            Ok(handle) => (handle, None),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("logroute-watch")
                    .enable_all()
                    .build()?;
                tracing::debug!("No caller runtime, config watcher runs on its own thread");
                (runtime.handle().clone(), Some(OwnedRuntime(Some(runtime))))
            }
        };

        let files: Arc<Mutex<Vec<WatchedFile>>> = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel::<FileChange>();

        let handler_files = files.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !is_relevant(&event.kind) {
                        return;
                    }
                    let files = handler_files.lock().expect("watched files lock poisoned");
                    for path in &event.paths {
                        let path = normalize_path(path);
                        if let Some(file) = files.iter().find(|f| f.path == path) {
                            if file.auto_reload {
                                let _ = tx.send(FileChange {
                                    path,
                                    kind: event.kind,
                                });
                            } else {
                                tracing::debug!(path = %path.display(), "Change observed, autoReload is off");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default(),
        )?;

        let task = handle.spawn(debounce_loop(factory, debounce, rx, shutdown.subscribe()));
        tracing::info!(debounce_ms = debounce.as_millis() as u64, "Config watcher started");

        Ok(Self {
            files,
            watcher: Mutex::new(watcher),
            directories: Mutex::new(HashSet::new()),
            shutdown,
            task,
            runtime,
        })
    }

    /// Replace the set of watched files.
    pub fn update(&self, files: &[WatchedFile]) {
        let wanted: HashSet<PathBuf> = files
            .iter()
            .filter_map(|f| f.path.parent().map(Path::to_path_buf))
            .collect();
        {
            let mut current = self.files.lock().expect("watched files lock poisoned");
            *current = files.to_vec();
        }

        let mut watcher = self.watcher.lock().expect("notify watcher lock poisoned");
        let mut directories = self.directories.lock().expect("watched directories lock poisoned");
        for dir in directories.difference(&wanted) {
            if let Err(e) = watcher.unwatch(dir) {
                tracing::debug!(dir = %dir.display(), error = %e, "Failed to unwatch directory");
            }
        }
        directories.retain(|d| wanted.contains(d));
        for dir in &wanted {
            if directories.contains(dir) {
                continue;
            }
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::debug!(dir = %dir.display(), "Watching directory");
                    directories.insert(dir.clone());
                }
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Failed to watch directory"),
            }
        }
    }

    pub fn watched_files(&self) -> Vec<WatchedFile> {
        self.files.lock().expect("watched files lock poisoned").clone()
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Whether the debounce task runs on the watcher's own runtime.
    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("files", &self.watched_files())
            .finish()
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

async fn debounce_loop(
    factory: Weak<LogFactory>,
    debounce: Duration,
    mut changes: mpsc::UnboundedReceiver<FileChange>,
    mut shutdown: ShutdownSignal,
) {
    // Configuration id that was active when the first change arrived.
    let mut pending: Option<Option<uuid::Uuid>> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Config watcher stopping");
                break;
            }
            change = changes.recv() => {
                let Some(change) = change else { break };
                tracing::debug!(path = %change.path.display(), kind = ?change.kind, "Config file change detected");
                if pending.is_none() {
                    let Some(factory) = factory.upgrade() else { break };
                    pending = Some(factory.configuration().map(|c| c.id()));
                }
                deadline = Instant::now() + debounce;
            }
            _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                let Some(Some(id)) = pending.take() else {
                    metrics::record_reload("watch", "skipped");
                    continue;
                };
                let Some(factory) = factory.upgrade() else { break };
                tracing::info!(config_id = %id, "Config file changed, reloading");
                if let Err(e) = tokio::task::spawn_blocking(move || factory.reload_from_watch(id)).await {
                    tracing::error!(error = %e, "Reload task failed");
                }
            }
        }
    }
}
