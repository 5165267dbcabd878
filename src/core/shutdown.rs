//! Shutdown Coordination
//!
//! Stop signals for background loops (janitor, delay schedulers, partition
//! readers) and signal handling for the CLI. A coordinator can be triggered
//! any number of times; receivers created after the trigger still observe it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Coordinates graceful shutdown of one or more tasks
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

/// Receiving side of a [`ShutdownCoordinator`]
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Trigger shutdown
    pub fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Guard execution of a future with process signal handling
    ///
    /// SIGINT/SIGTERM/SIGHUP/SIGQUIT (or Ctrl-C elsewhere) trigger the
    /// coordinator handed to the closure; a second signal exits immediately.
    pub async fn guard<F, Fut, R, E>(future_fn: F) -> Result<R, E>
    where
        F: FnOnce(ShutdownCoordinator) -> Fut,
        Fut: std::future::Future<Output = Result<R, E>>,
    {
        let coordinator = Self::new();
        setup_signal_handlers(coordinator.clone());
        future_fn(coordinator).await
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// True once the owning coordinator has been triggered
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested (or the coordinator is gone)
    pub async fn wait(&mut self) {
        // Err means every sender was dropped, which is also a stop.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

fn setup_signal_handlers(coordinator: ShutdownCoordinator) {
    let signal_count = Arc::new(AtomicUsize::new(0));

    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }

        use tokio::signal::unix::{signal, SignalKind};
        let signals = [
            SignalKind::interrupt(),
            SignalKind::terminate(),
            SignalKind::hangup(),
            SignalKind::quit(),
        ];

        for kind in signals {
            let coordinator = coordinator.clone();
            let sig_ctr = signal_count.clone();

            tokio::spawn(async move {
                if let Ok(mut sig) = signal(kind) {
                    while sig.recv().await.is_some() {
                        let prev = sig_ctr.fetch_add(1, Ordering::AcqRel);
                        coordinator.trigger_shutdown();
                        if prev >= 1 {
                            log::warn!("Second shutdown signal received; exiting");
                            std::process::exit(130);
                        }
                    }
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                let prev = signal_count.fetch_add(1, Ordering::AcqRel);
                coordinator.trigger_shutdown();
                if prev >= 1 {
                    std::process::exit(130);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_requested());
        assert!(!coordinator.subscribe().is_triggered());
    }

    #[tokio::test]
    async fn test_shutdown_coordinator_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.subscribe();

        coordinator.trigger_shutdown();

        assert!(coordinator.is_shutdown_requested());
        let received = timeout(Duration::from_millis(100), signal.wait()).await;
        assert!(received.is_ok(), "Should receive shutdown signal");
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger_shutdown();
        coordinator.trigger_shutdown();

        let mut late = coordinator.subscribe();
        assert!(late.is_triggered());
        let received = timeout(Duration::from_millis(100), late.wait()).await;
        assert!(received.is_ok());
    }

    #[tokio::test]
    async fn test_signal_pending_until_triggered() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.subscribe();

        let waited = timeout(Duration::from_millis(30), signal.wait()).await;
        assert!(waited.is_err(), "No trigger yet");
    }
}
