//! Orderly shutdown.
//!
//! The [`ShutdownCoordinator`] moves through `Running -> Draining -> Stopped`.
//! Entering `Draining` closes the registry to new sessions. Draining then
//! flushes usage for open sessions, removes every session from the registry
//! and closes its transport, all bounded by a grace period. Sessions still
//! registered when the grace period runs out are closed without waiting. The
//! coordinator only reports how the drain went; deciding to exit the process
//! is left to `main`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::mcp::SessionRegistry;
use crate::metering::UsageMeter;

/// Default grace period for draining sessions.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(15);

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every session was closed within the grace period.
    Clean { closed: usize },
    /// The grace period elapsed first.
    TimedOut,
    /// Another caller already started the drain.
    AlreadyDraining,
}

/// Coordinates the drain of all live sessions.
pub struct ShutdownCoordinator {
    registry: SessionRegistry,
    meter: Arc<dyn UsageMeter>,
    grace: Duration,
    state: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
    pub fn new(registry: SessionRegistry, meter: Arc<dyn UsageMeter>, grace: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            registry,
            meter,
            grace,
            state,
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Drain all sessions, giving up after the grace period.
    ///
    /// Only the first call drains; later calls return
    /// [`DrainOutcome::AlreadyDraining`] immediately.
    pub async fn drain(&self) -> DrainOutcome {
        let started = self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        });
        if !started {
            return DrainOutcome::AlreadyDraining;
        }

        self.registry.close();
        info!(
            "Draining {} session(s), grace period {}s",
            self.registry.len(),
            self.grace.as_secs()
        );

        let outcome = match tokio::time::timeout(self.grace, self.drain_sessions()).await {
            Ok(closed) => {
                info!("Drain complete, closed {} session(s)", closed);
                DrainOutcome::Clean { closed }
            }
            Err(_) => {
                warn!(
                    "Drain did not finish within {}s, closing remaining sessions",
                    self.grace.as_secs()
                );
                let closed = self.close_sessions();
                warn!("Force-closed {} session(s)", closed);
                DrainOutcome::TimedOut
            }
        };

        self.state.send_replace(ShutdownState::Stopped);
        outcome
    }

    async fn drain_sessions(&self) -> usize {
        let open = self.registry.summaries();
        if let Err(e) = self.meter.charge_sessions(&open).await {
            error!("Failed to charge for open sessions: {:#}", e);
        }

        self.close_sessions()
    }

    fn close_sessions(&self) -> usize {
        let transports = self.registry.drain_all();
        for transport in &transports {
            transport.close();
        }
        transports.len()
    }
}

/// Wait for a termination request.
///
/// Resolves on Ctrl+C, SIGTERM, or, when `watch_stdin` is set, when stdin
/// reaches end of file.
pub async fn shutdown_signal(watch_stdin: bool) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let stdin_closed = async {
        if watch_stdin {
            wait_for_stdin_eof().await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
        _ = stdin_closed => info!("Stdin closed, shutting down..."),
    }
}

async fn wait_for_stdin_eof() {
    use tokio::io::AsyncReadExt;

    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 1024];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

/// Resolve once the grace period has elapsed after draining started.
///
/// Used by `main` as the hard deadline for the whole shutdown.
pub async fn forced_exit_deadline(mut state: watch::Receiver<ShutdownState>, grace: Duration) {
    if state
        .wait_for(|s| *s != ShutdownState::Running)
        .await
        .is_err()
    {
        // Coordinator dropped without draining
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}
