//! # Shutdown
//!
//! Cancellation shared by the run loop and the signal handler. SIGINT stops
//! the operator at once; SIGTERM lets the pass in flight finish first.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// Why the operator is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Stop without draining in-flight work.
    Immediate,
    /// Finish the current reconciliation pass, then stop.
    Graceful,
}

/// Process signals the operator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    pub fn shutdown_cause(self) -> ShutdownCause {
        match self {
            Signal::Interrupt => ShutdownCause::Immediate,
            Signal::Terminate => ShutdownCause::Graceful,
        }
    }
}

/// Cloneable cancellation handle. The first cause triggered wins.
#[derive(Clone)]
pub struct Shutdown {
    cause: Arc<watch::Sender<Option<ShutdownCause>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (cause, _) = watch::channel(None);
        Self {
            cause: Arc::new(cause),
        }
    }

    /// Request shutdown. Returns false if one was already requested.
    pub fn trigger(&self, cause: ShutdownCause) -> bool {
        self.cause.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(cause);
            true
        })
    }

    pub fn cause(&self) -> Option<ShutdownCause> {
        *self.cause.borrow()
    }

    /// React to a process signal. Signals arriving after shutdown has been
    /// requested are ignored.
    pub fn on_signal(&self, signal: Signal) -> bool {
        debug!("Trapped {signal:?} signal");
        if self.cause().is_some() {
            return false;
        }

        let cause = signal.shutdown_cause();
        if cause == ShutdownCause::Immediate {
            info!("Exiting...");
        }
        self.trigger(cause)
    }

    /// Resolves once any shutdown is requested.
    pub async fn cancelled(&self) -> ShutdownCause {
        self.wait_for(|cause| cause.is_some()).await
    }

    /// Resolves once an immediate shutdown is requested.
    pub async fn interrupted(&self) {
        self.wait_for(|cause| *cause == Some(ShutdownCause::Immediate))
            .await;
    }

    async fn wait_for(&self, ready: impl FnMut(&Option<ShutdownCause>) -> bool) -> ShutdownCause {
        let mut receiver = self.cause.subscribe();
        match receiver.wait_for(ready).await.map(|cause| *cause) {
            Ok(Some(cause)) => cause,
            // The sender lives as long as `self`, so this never resolves.
            _ => std::future::pending().await,
        }
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("cause", &self.cause())
            .finish()
    }
}

/// Translate SIGINT and SIGTERM into shutdown requests. Returns once one
/// of them has taken effect.
#[cfg(unix)]
pub async fn handle_signals(shutdown: Shutdown) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        let signal = tokio::select! {
            _ = interrupt.recv() => Signal::Interrupt,
            _ = terminate.recv() => Signal::Terminate,
        };

        if shutdown.on_signal(signal) {
            return Ok(());
        }
    }
}

#[cfg(not(unix))]
pub async fn handle_signals(shutdown: Shutdown) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        if shutdown.on_signal(Signal::Interrupt) {
            return Ok(());
        }
    }
}
