/*
    registrar.rs - Announce the client identity to the sync service

    Sends `{ action: "register", uuid }` (plus the correlator's sessionId)
    every time the channel opens and every time the identity changes while
    it is open. Each (open epoch, identity) pair is announced exactly once.
    Without an identity nothing is sent; the next open or identity change
    retries.
*/

use crate::rpc::{CallCorrelator, ACTION_REGISTER};
use crate::transport::ChannelState;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct SessionRegistrar {
    identity_tx: watch::Sender<Option<String>>,
}

impl SessionRegistrar {
    pub fn new() -> Self {
        let (identity_tx, _) = watch::channel(None);
        SessionRegistrar { identity_tx }
    }

    /// Set (or clear) the client identity
    pub fn set_identity(&self, identity: Option<String>) {
        self.identity_tx.send_if_modified(|current| {
            if *current == identity {
                return false;
            }
            *current = identity;
            true
        });
    }

    pub fn identity(&self) -> Option<String> {
        self.identity_tx.borrow().clone()
    }

    /// Follow channel state and identity. Abort the handle to stop.
    pub fn spawn(&self, correlator: Arc<CallCorrelator>) -> JoinHandle<()> {
        let mut state_rx = correlator.channel().subscribe_state();
        let mut identity_rx = self.identity_tx.subscribe();

        tokio::spawn(async move {
            let mut announced: Option<(u64, String)> = None;
            loop {
                let state = *state_rx.borrow_and_update();
                let identity = identity_rx.borrow_and_update().clone();

                if let (ChannelState::Open { epoch }, Some(uuid)) = (state, identity) {
                    let key = (epoch, uuid);
                    if announced.as_ref() != Some(&key) {
                        let message = json!({ "action": ACTION_REGISTER, "uuid": key.1 });
                        if correlator.send(message).is_some() {
                            info!(epoch, "session registered");
                            announced = Some(key);
                        } else {
                            debug!(epoch, "registration not sent");
                        }
                    }
                }

                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = identity_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for SessionRegistrar {
    fn default() -> Self {
        Self::new()
    }
}
