//! Stop signal shared by a factory, its watcher task and the binary.
//!
//! The signal is sticky: a watcher started after `trigger` sees it at once
//! instead of waiting for a message it already missed. Dropping every
//! `Shutdown` handle counts as a trigger for the listeners left behind.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A listener for one task.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Listeners that have not been dropped yet.
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half held by a task.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown was triggered, including before this call.
    pub async fn recv(&mut self) {
        // Err: every sender is gone
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_late_listener_still_sees_trigger() {
        let shutdown = Shutdown::new();
        let mut early = shutdown.subscribe();
        shutdown.trigger();
        let mut late = shutdown.clone().subscribe();

        assert!(shutdown.is_triggered());
        assert!(late.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), early.recv()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), late.recv()).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_the_sender_releases_listeners() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        assert_eq!(shutdown.listeners(), 1);
        assert!(!signal.is_triggered());

        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), signal.recv()).await.unwrap();
    }
}
