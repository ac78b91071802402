//! Lifecycle notifications for the sync engine
//!
//! Hosts report two events: the client going to the background
//! (`VisibilityHidden`) and the client going away (`Teardown`). Both are
//! broadcast; the engine flushes pending saves on either and disconnects
//! for good on teardown.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Client backgrounded; flush, keep running
    VisibilityHidden,
    /// Client shutting down; flush and close the channel
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    TearingDown,
}

pub struct LifecycleCoordinator {
    state: RwLock<LifecycleState>,
    tx: broadcast::Sender<LifecycleSignal>,
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCoordinator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            state: RwLock::new(LifecycleState::Running),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.tx.subscribe()
    }

    /// Client moved to the background
    pub async fn notify_hidden(&self) {
        if *self.state.read().await != LifecycleState::Running {
            return;
        }
        if self.tx.send(LifecycleSignal::VisibilityHidden).is_err() {
            warn!("visibility change with no lifecycle listeners");
        }
    }

    /// Broadcast teardown once. Later calls are ignored.
    pub async fn teardown(&self) {
        let mut state = self.state.write().await;
        if *state != LifecycleState::Running {
            warn!("Teardown already in progress");
            return;
        }
        *state = LifecycleState::TearingDown;
        drop(state);

        info!("Initiating teardown");
        if let Err(e) = self.tx.send(LifecycleSignal::Teardown) {
            error!("Failed to send teardown signal: {}", e);
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    pub async fn is_tearing_down(&self) -> bool {
        self.state().await == LifecycleState::TearingDown
    }

    /// Resolves once teardown has been broadcast
    pub async fn wait_for_teardown(&self) {
        let mut rx = self.subscribe();
        if self.is_tearing_down().await {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(LifecycleSignal::Teardown) | Err(broadcast::error::RecvError::Closed) => return,
                Ok(LifecycleSignal::VisibilityHidden) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.is_tearing_down().await {
                        return;
                    }
                }
            }
        }
    }
}

/// Map SIGINT/SIGTERM to teardown
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<LifecycleCoordinator>) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        coordinator.teardown().await;
    })
}

/// Map Ctrl+C to teardown
#[cfg(windows)]
pub fn install_signal_handlers(coordinator: Arc<LifecycleCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Received Ctrl+C");
        coordinator.teardown().await;
    })
}
