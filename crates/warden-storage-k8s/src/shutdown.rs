//! Shutdown signalling shared by requests and background tasks.
//!
//! `close()` flips a single `watch` channel. In-flight HTTP calls race
//! against it and are dropped (which aborts the connection) once it fires;
//! background loops check it between iterations and while sleeping.

use std::time::Duration;

use tokio::sync::watch;

/// Sending half, owned by the storage.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Raises the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, cloned into every component that must stop on close.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Returns `true` once the signal has been raised.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes when the signal is raised or the trigger is dropped.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleeps for `duration`.
    ///
    /// Returns `false` if the signal was raised before the time elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.triggered() => false,
        }
    }
}

/// Creates a connected trigger/signal pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_signal() {
        let (_trigger, signal) = channel();
        assert!(signal.sleep(Duration::from_millis(5)).await);
        assert!(!signal.is_triggered());
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_trigger() {
        let (trigger, signal) = channel();
        let sleeper = tokio::spawn({
            let signal = signal.clone();
            async move { signal.sleep(Duration::from_secs(60)).await }
        });

        trigger.trigger();
        let completed = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("sleep should be interrupted")
            .unwrap();
        assert!(!completed);
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, signal) = channel();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(5), signal.triggered())
            .await
            .expect("dropped trigger should release waiters");
    }
}
