//! Compound and wrapper targets.
//!
//! # Responsibilities
//! - `SplitGroup`: fan one event out to several targets
//! - `AutoFlushWrapper`: flush the wrapped target after every write
//! - `AsyncWrapper`: hand events to a background worker thread
//!
//! # Design Decisions
//! - The async worker is a plain OS thread draining a tokio unbounded
//!   channel with `blocking_recv`, so it works with or without a runtime
//! - Thread-bound layouts are precalculated on the logging thread before
//!   the event is queued
//! - `close` is idempotent; wrappers close what they wrap

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::error::{ConfigError, Result, TargetError};
use crate::event::LogEvent;
use crate::targets::{Target, TargetBuilder, TargetContext};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub struct SplitGroupTarget {
    name: String,
    targets: Vec<Arc<dyn Target>>,
}

impl SplitGroupTarget {
    pub fn new(name: impl Into<String>, targets: Vec<Arc<dyn Target>>) -> Self {
        Self {
            name: name.into(),
            targets,
        }
    }
}

impl Target for SplitGroupTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "SplitGroup"
    }

    fn initialize(&self) -> Result<(), TargetError> {
        self.targets.iter().try_for_each(|t| t.initialize())
    }

    fn write(&self, event: &Arc<LogEvent>) -> Result<(), TargetError> {
        let mut first_error = None;
        for target in &self.targets {
            if let Err(e) = target.write(event) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn flush(&self) -> Result<(), TargetError> {
        self.targets.iter().try_for_each(|t| t.flush())
    }

    fn close(&self) {
        for target in &self.targets {
            target.close();
        }
    }

    fn wrapped_targets(&self) -> Vec<Arc<dyn Target>> {
        self.targets.clone()
    }

    fn precalculate(&self, event: &LogEvent) {
        for target in &self.targets {
            target.precalculate(event);
        }
    }
}

#[derive(Debug)]
pub struct AutoFlushTargetWrapper {
    name: String,
    inner: Arc<dyn Target>,
}

impl AutoFlushTargetWrapper {
    pub fn new(name: impl Into<String>, inner: Arc<dyn Target>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

impl Target for AutoFlushTargetWrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "AutoFlushWrapper"
    }

    fn initialize(&self) -> Result<(), TargetError> {
        self.inner.initialize()
    }

    fn write(&self, event: &Arc<LogEvent>) -> Result<(), TargetError> {
        self.inner.write(event)?;
        self.inner.flush()
    }

    fn flush(&self) -> Result<(), TargetError> {
        self.inner.flush()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn wrapped_targets(&self) -> Vec<Arc<dyn Target>> {
        vec![self.inner.clone()]
    }

    fn precalculate(&self, event: &LogEvent) {
        self.inner.precalculate(event);
    }
}

enum Command {
    Write(Arc<LogEvent>),
    Flush(std_mpsc::Sender<()>),
    Close,
}

/// Queues events for a background worker that writes to the inner target.
#[derive(Debug)]
pub struct AsyncTargetWrapper {
    name: String,
    inner: Arc<dyn Target>,
    queue_limit: usize,
    queued: Arc<AtomicUsize>,
    tx: mpsc::UnboundedSender<Command>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Write(event) => write!(f, "Write({})", event.id()),
            Command::Flush(_) => f.write_str("Flush"),
            Command::Close => f.write_str("Close"),
        }
    }
}

impl AsyncTargetWrapper {
    pub const DEFAULT_QUEUE_LIMIT: usize = 10_000;

    pub fn new(name: impl Into<String>, inner: Arc<dyn Target>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            inner,
            queue_limit: Self::DEFAULT_QUEUE_LIMIT,
            queued: Arc::new(AtomicUsize::new(0)),
            tx,
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Events beyond this many pending are discarded. Zero means unbounded.
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit;
        self
    }

    pub fn pending(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    fn ensure_started(&self) -> Result<(), TargetError> {
        let Some(mut rx) = self.rx.lock().expect("async receiver lock poisoned").take() else {
            return Ok(());
        };

        let inner = self.inner.clone();
        let queued = self.queued.clone();
        let handle = std::thread::Builder::new()
            .name(format!("logroute-async-{}", self.name))
            .spawn(move || {
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        Command::Write(event) => {
                            queued.fetch_sub(1, Ordering::AcqRel);
                            if let Err(e) = inner.write(&event) {
                                tracing::warn!(target_name = inner.name(), error = %e, "Async write failed");
                            }
                        }
                        Command::Flush(ack) => {
                            if let Err(e) = inner.flush() {
                                tracing::warn!(target_name = inner.name(), error = %e, "Async flush failed");
                            }
                            let _ = ack.send(());
                        }
                        Command::Close => break,
                    }
                }
            })?;
        *self.worker.lock().expect("async worker lock poisoned") = Some(handle);
        Ok(())
    }
}

impl Target for AsyncTargetWrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        "AsyncWrapper"
    }

    fn initialize(&self) -> Result<(), TargetError> {
        self.inner.initialize()?;
        self.ensure_started()
    }

    fn write(&self, event: &Arc<LogEvent>) -> Result<(), TargetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TargetError::Closed(self.name.clone()));
        }
        self.ensure_started()?;

        if self.queue_limit > 0 && self.queued.load(Ordering::Acquire) >= self.queue_limit {
            tracing::debug!(target_name = %self.name, "Async queue full, discarding event");
            return Ok(());
        }

        self.inner.precalculate(event);
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.tx.send(Command::Write(event.clone())).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            TargetError::Closed(self.name.clone())
        })
    }

    fn flush(&self) -> Result<(), TargetError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.ensure_started()?;
        let (ack_tx, ack_rx) = std_mpsc::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .map_err(|_| TargetError::Closed(self.name.clone()))?;
        ack_rx.recv_timeout(FLUSH_TIMEOUT).map_err(|_| TargetError::Write {
            target: self.name.clone(),
            message: "flush timed out".to_string(),
        })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Command::Close);
        if let Some(handle) = self.worker.lock().expect("async worker lock poisoned").take() {
            let _ = handle.join();
        }
        self.inner.close();
    }

    fn wrapped_targets(&self) -> Vec<Arc<dyn Target>> {
        vec![self.inner.clone()]
    }
}

pub(crate) struct SplitGroupBuilder {
    name: String,
    targets: Vec<Arc<dyn Target>>,
}

impl SplitGroupBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            targets: Vec::new(),
        }
    }
}

impl TargetBuilder for SplitGroupBuilder {
    fn set_property(&mut self, _name: &str, _value: &str, _ctx: &TargetContext) -> Result<bool> {
        Ok(false)
    }

    fn accepts_targets(&self) -> bool {
        true
    }

    fn add_target(&mut self, target: Arc<dyn Target>) -> Result<()> {
        self.targets.push(target);
        Ok(())
    }

    fn build(self: Box<Self>, _ctx: &TargetContext) -> Result<Arc<dyn Target>> {
        Ok(Arc::new(SplitGroupTarget::new(self.name, self.targets)))
    }
}

fn single_child(
    kind: &str,
    name: &str,
    inner: Option<Arc<dyn Target>>,
) -> Result<Arc<dyn Target>> {
    inner.ok_or_else(|| {
        ConfigError::invalid(kind, name, "wrapper target requires exactly one inner target")
    })
}

pub(crate) struct AutoFlushBuilder {
    name: String,
    inner: Option<Arc<dyn Target>>,
}

impl AutoFlushBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: None,
        }
    }
}

impl TargetBuilder for AutoFlushBuilder {
    fn set_property(&mut self, _name: &str, _value: &str, _ctx: &TargetContext) -> Result<bool> {
        Ok(false)
    }

    fn accepts_targets(&self) -> bool {
        true
    }

    fn add_target(&mut self, target: Arc<dyn Target>) -> Result<()> {
        if self.inner.is_some() {
            return Err(ConfigError::invalid(
                "AutoFlushWrapper",
                &self.name,
                "wrapper target requires exactly one inner target",
            ));
        }
        self.inner = Some(target);
        Ok(())
    }

    fn build(self: Box<Self>, _ctx: &TargetContext) -> Result<Arc<dyn Target>> {
        let inner = single_child("AutoFlushWrapper", &self.name, self.inner)?;
        Ok(Arc::new(AutoFlushTargetWrapper::new(self.name, inner)))
    }
}

pub(crate) struct AsyncWrapperBuilder {
    name: String,
    inner: Option<Arc<dyn Target>>,
    queue_limit: usize,
}

impl AsyncWrapperBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: None,
            queue_limit: AsyncTargetWrapper::DEFAULT_QUEUE_LIMIT,
        }
    }
}

impl TargetBuilder for AsyncWrapperBuilder {
    fn set_property(&mut self, name: &str, value: &str, _ctx: &TargetContext) -> Result<bool> {
        match name.to_ascii_lowercase().as_str() {
            "queuelimit" => {
                self.queue_limit = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid(name, value, "expected a count"))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn accepts_targets(&self) -> bool {
        true
    }

    fn add_target(&mut self, target: Arc<dyn Target>) -> Result<()> {
        if self.inner.is_some() {
            return Err(ConfigError::invalid(
                "AsyncWrapper",
                &self.name,
                "wrapper target requires exactly one inner target",
            ));
        }
        self.inner = Some(target);
        Ok(())
    }

    fn build(self: Box<Self>, _ctx: &TargetContext) -> Result<Arc<dyn Target>> {
        let inner = single_child("AsyncWrapper", &self.name, self.inner)?;
        Ok(Arc::new(
            AsyncTargetWrapper::new(self.name, inner).with_queue_limit(self.queue_limit),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::level::LogLevel;
    use crate::targets::MemoryTarget;

    fn event(message: &str) -> Arc<LogEvent> {
        Arc::new(LogEvent::new(LogLevel::Info, "test", message))
    }

    #[test]
    fn split_group_writes_to_every_child() {
        let a = Arc::new(MemoryTarget::with_message_layout("a"));
        let b = Arc::new(MemoryTarget::with_message_layout("b"));
        let group = SplitGroupTarget::new("g", vec![a.clone(), b.clone()]);
        group.write(&event("x")).unwrap();
        assert_eq!(a.logs(), vec!["x"]);
        assert_eq!(b.logs(), vec!["x"]);
        assert_eq!(group.wrapped_targets().len(), 2);
    }

    #[test]
    fn async_wrapper_delivers_on_flush() {
        let memory = Arc::new(MemoryTarget::with_message_layout("m"));
        let wrapper = AsyncTargetWrapper::new("async", memory.clone());
        wrapper.initialize().unwrap();
        for i in 0..10 {
            wrapper.write(&event(&format!("e{i}"))).unwrap();
        }
        wrapper.flush().unwrap();
        assert_eq!(memory.len(), 10);
        assert_eq!(wrapper.pending(), 0);
        wrapper.close();
        assert!(memory.is_closed());
        assert!(wrapper.write(&event("late")).is_err());
    }

    #[test]
    fn async_wrapper_captures_thread_name_before_queueing() {
        let layout = Layout::parse("${threadname}").unwrap();
        let memory = Arc::new(MemoryTarget::new("m", layout));
        let wrapper = Arc::new(AsyncTargetWrapper::new("async", memory.clone()));
        wrapper.initialize().unwrap();
        let writer = wrapper.clone();
        std::thread::Builder::new()
            .name("caller".into())
            .spawn(move || writer.write(&event("x")).unwrap())
            .unwrap()
            .join()
            .unwrap();
        wrapper.flush().unwrap();
        assert_eq!(memory.logs(), vec!["caller"]);
        wrapper.close();
    }

    #[test]
    fn wrapper_builders_require_one_child() {
        let ctx = TargetContext::default();
        assert!(Box::new(AutoFlushBuilder::new("w")).build(&ctx).is_err());
        let mut builder = AsyncWrapperBuilder::new("w");
        builder
            .add_target(Arc::new(MemoryTarget::with_message_layout("m")))
            .unwrap();
        assert!(builder
            .add_target(Arc::new(MemoryTarget::with_message_layout("n")))
            .is_err());
    }
}
