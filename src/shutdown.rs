//! External stop signal for a running session.

use tokio::sync::watch;
use tracing::info;

/// Creates a connected trigger/signal pair.
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

/// Requests shutdown of every [`ShutdownSignal`] created from the same channel.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Request shutdown.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Get another signal observing this handle.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown when the process receives Ctrl-C.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger_on_ctrl_c(self) {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                self.trigger();
            }
        });
    }
}

/// Observes a shutdown request.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Check if shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested.
    ///
    /// Never resolves if the handle is dropped without triggering.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger() {
        let (handle, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move {
            signal.triggered().await;
        });
        handle.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_triggered() {
        let (handle, _) = shutdown_channel();
        handle.trigger();
        let mut late = handle.signal();
        assert!(late.is_triggered());
        tokio::time::timeout(Duration::from_millis(50), late.triggered())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_never_fires() {
        let (handle, mut signal) = shutdown_channel();
        drop(handle);
        let outcome = tokio::time::timeout(Duration::from_millis(20), signal.triggered()).await;
        assert!(outcome.is_err());
        assert!(!ShutdownSignal::never().is_triggered());
    }
}
