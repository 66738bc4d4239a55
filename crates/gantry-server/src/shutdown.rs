//! Shutdown coordination.
//!
//! A [`ShutdownSignal`] is shared by the accept loop, every open connection
//! and the lifecycle coordinator. Triggering it stops accepting and asks open
//! connections to finish their current call. [`ConnectionTracker`] counts the
//! connections still draining.
//!
//! ```rust
//! use gantry_server::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let observer = shutdown.clone();
//!
//! shutdown.trigger();
//! assert!(observer.is_shutdown());
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

/// A cloneable, one-shot shutdown trigger.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    state: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Triggers shutdown. Later calls do nothing.
    pub fn trigger(&self) {
        self.state.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        });
    }

    /// Whether shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.state.borrow()
    }

    /// Completes once shutdown is triggered, immediately if it already was.
    pub fn recv(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.state.subscribe();
        async move {
            // a closed channel means every signal is gone
            let _ = receiver.wait_for(|triggered| *triggered).await;
        }
    }

    /// Triggers this signal when `signal` completes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger_on<F>(&self, signal: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            signal.await;
            this.trigger();
        });
    }

    /// A signal triggered by SIGTERM or SIGINT.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        signal.trigger_on(wait_for_os_signal());
        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes on SIGTERM or SIGINT (Ctrl+C elsewhere).
///
/// If the handlers cannot be installed the failure is logged and the future
/// never completes, leaving shutdown to other triggers.
pub async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "failed to install signal handlers");
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to wait for Ctrl+C");
            return std::future::pending().await;
        }
        tracing::info!("received Ctrl+C, shutting down");
    }
}

/// Counts open connections so shutdown can wait for them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Completes when no connections remain.
    pub async fn wait_for_drain(&self) {
        loop {
            let notified = self.notify.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// One open connection.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}
