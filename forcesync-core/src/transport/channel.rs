/*
  TransportChannel - one auto-reconnecting duplex link to the sync service

  Owns at most one live `Connection` at a time, the reconnect policy and the
  published connection state. Frames received on any connection are forwarded
  into a single inbound queue handed out at construction.

  State machine:

      Idle ──connect()──► Connecting ──ok──► Open{epoch}
                             ▲   │                │
                  backoff    │   └─fail─┐   close/error
                   timer     │          ▼         ▼
                             └─────── Closed ◄────┘

  - connect(): no-op while Connecting/Open, otherwise tears down the old
    link without reconnect side effects and dials again
  - on open: attempt counter reset, epoch incremented, state published
  - on close: state Closed; reconnect scheduled if still desired and the
    network is up
  - network online: attempt counter reset, dial immediately
  - network offline: pending reconnect cancelled, link dropped

  Every dial carries a generation number. Completions from a superseded
  generation are ignored, so a late connect or close from an old link
  can never clobber the current state.
*/

use super::backoff::Backoff;
use super::connector::Connector;
use super::errors::{TransportError, TransportResult};
use super::network::NetworkMonitor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Never connected
    Idle,
    Connecting,
    /// Connected; `epoch` counts successful opens
    Open { epoch: u64 },
    Closed,
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open { .. })
    }

    fn is_active(&self) -> bool {
        matches!(self, ChannelState::Connecting | ChannelState::Open { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Drop the link but keep reconnecting
    Transient,
    /// Stop until the next explicit `connect()`
    Permanent,
}

struct LinkState {
    generation: u64,
    epoch: u64,
    attempt: u32,
    reconnect_desired: bool,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connection_task: Option<AbortHandle>,
    reconnect_task: Option<AbortHandle>,
}

impl LinkState {
    fn drop_link(&mut self) {
        self.generation += 1;
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
        self.outbound = None;
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

struct ChannelInner {
    endpoint: String,
    session_id: String,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    network: NetworkMonitor,
    state_tx: watch::Sender<ChannelState>,
    inbound_tx: mpsc::UnboundedSender<String>,
    link: Mutex<LinkState>,
}

#[derive(Clone)]
pub struct TransportChannel {
    inner: Arc<ChannelInner>,
}

impl TransportChannel {
    /// Create an idle channel and the queue its inbound frames arrive on
    pub fn new(
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        backoff: Backoff,
        network: NetworkMonitor,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ChannelState::Idle);
        let inner = ChannelInner {
            endpoint: endpoint.into(),
            session_id: Uuid::new_v4().to_string(),
            connector,
            backoff,
            network,
            state_tx,
            inbound_tx,
            link: Mutex::new(LinkState {
                generation: 0,
                epoch: 0,
                attempt: 0,
                reconnect_desired: false,
                outbound: None,
                connection_task: None,
                reconnect_task: None,
            }),
        };
        (TransportChannel { inner: Arc::new(inner) }, inbound_rx)
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Identifier of this client session, stable across reconnects
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of reconnect attempts scheduled since the last successful open
    pub fn attempt(&self) -> u32 {
        self.link().attempt
    }

    fn link(&self) -> MutexGuard<'_, LinkState> {
        self.inner.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: ChannelState) {
        self.inner.state_tx.send_replace(state);
    }

    pub fn connect(&self) {
        let mut link = self.link();
        link.reconnect_desired = true;
        if self.state().is_active() {
            return;
        }
        link.cancel_reconnect();
        self.start_attempt(&mut link);
    }

    fn start_attempt(&self, link: &mut LinkState) {
        link.drop_link();
        let generation = link.generation;
        self.publish(ChannelState::Connecting);

        let this = self.clone();
        let task = tokio::spawn(async move { this.run_connection(generation).await });
        link.connection_task = Some(task.abort_handle());
    }

    async fn run_connection(&self, generation: u64) {
        debug!(endpoint = %self.inner.endpoint, generation, "dialing");
        let connection = match self.inner.connector.connect(&self.inner.endpoint).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(endpoint = %self.inner.endpoint, error = %e, "connection attempt failed");
                crate::metrics::record_connect_failure();
                self.handle_closed(generation);
                return;
            }
        };

        let mut inbound = connection.inbound;
        if !self.handle_open(generation, connection.outbound) {
            return;
        }

        while let Some(frame) = inbound.recv().await {
            if self.inner.inbound_tx.send(frame).is_err() {
                break;
            }
        }
        self.handle_closed(generation);
    }

    fn handle_open(&self, generation: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut link = self.link();
        if link.generation != generation {
            return false;
        }
        link.attempt = 0;
        link.epoch += 1;
        link.outbound = Some(outbound);
        let epoch = link.epoch;
        self.publish(ChannelState::Open { epoch });
        info!(endpoint = %self.inner.endpoint, epoch, "channel open");
        crate::metrics::record_channel_open();
        true
    }

    fn handle_closed(&self, generation: u64) {
        let mut link = self.link();
        if link.generation != generation {
            return;
        }
        link.outbound = None;
        link.connection_task = None;
        self.publish(ChannelState::Closed);
        info!(endpoint = %self.inner.endpoint, "channel closed");

        if link.reconnect_desired && self.inner.network.is_online() {
            self.schedule_reconnect(&mut link);
        }
    }

    fn schedule_reconnect(&self, link: &mut LinkState) {
        link.cancel_reconnect();
        let delay = self.inner.backoff.delay(link.attempt);
        link.attempt = link.attempt.saturating_add(1);
        debug!(attempt = link.attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let this = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.reconnect_now();
        });
        link.reconnect_task = Some(task.abort_handle());
    }

    fn reconnect_now(&self) {
        let mut link = self.link();
        link.reconnect_task = None;
        if !link.reconnect_desired || self.state().is_active() {
            return;
        }
        self.start_attempt(&mut link);
    }

    /// Drop the current link. `Transient` goes through the reconnect path,
    /// `Permanent` stops reconnecting until the next `connect()`.
    pub fn disconnect(&self, kind: DisconnectKind) {
        let mut link = self.link();
        link.drop_link();
        if kind == DisconnectKind::Permanent {
            link.reconnect_desired = false;
            link.cancel_reconnect();
        }
        if self.state() != ChannelState::Idle {
            self.publish(ChannelState::Closed);
        }
        info!(endpoint = %self.inner.endpoint, ?kind, "channel disconnected");

        if kind == DisconnectKind::Transient
            && link.reconnect_desired
            && self.inner.network.is_online()
        {
            self.schedule_reconnect(&mut link);
        }
    }

    /// React to a host reachability transition
    pub fn handle_network_change(&self, online: bool) {
        let mut link = self.link();
        if online {
            link.attempt = 0;
            if !link.reconnect_desired {
                return;
            }
            link.cancel_reconnect();
            if !self.state().is_active() {
                self.start_attempt(&mut link);
            }
        } else {
            link.cancel_reconnect();
            link.drop_link();
            if self.state() != ChannelState::Idle {
                self.publish(ChannelState::Closed);
            }
        }
    }

    /// Follow the network monitor until the channel is dropped
    pub fn watch_network(&self) -> JoinHandle<()> {
        let mut rx = self.inner.network.subscribe();
        let weak: Weak<ChannelInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                info!(online, "network state changed");
                TransportChannel { inner }.handle_network_change(online);
            }
        })
    }

    /// Write a frame if and only if the channel is open
    pub fn send_text(&self, text: String) -> TransportResult<()> {
        let link = self.link();
        match (&link.outbound, self.state()) {
            (Some(tx), ChannelState::Open { .. }) => {
                tx.send(text).map_err(|_| TransportError::NotConnected)
            }
            _ => Err(TransportError::NotConnected),
        }
    }

    /// Wait until the channel is open, for at most `timeout`
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(ChannelState::is_open)).await,
            Ok(Ok(_))
        );
        ready
    }
}
