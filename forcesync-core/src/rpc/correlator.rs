/*
    CallCorrelator - request/response and publish/subscribe over the channel

    Workflow:

    1. send(payload): stamp sessionId + fresh requestId, write it if the
       channel is open, otherwise drop and log. Never queued, never retried.

    2. send_and_wait(payload, timeout):
        - returns None straight away if the channel is not open
        - registers a pending call keyed by requestId, with a timeout task
        - resolves with the first inbound message echoing that requestId,
          or None when the timeout fires first

    3. On receive (handle_frame):
        - oversized or malformed frames are logged and dropped
        - a requestId matching a pending call resolves it and stops there
        - otherwise fan out by `action` to every handler for that action and
          every wildcard handler; the configured error action also goes to
          the global error callback

    A pending call is removed from the map by whichever of reply/timeout gets
    there first, and the other path finds nothing to resolve. Handlers run
    one by one with their errors and panics caught individually.

    Topics: at most one handler per topic. Re-subscribing a topic removes the
    previous handler before installing the new one.
*/

use super::envelope::{action_of, stamp, InboundMessage, WILDCARD_ACTION};
use crate::transport::{TransportChannel, MAX_FRAME_SIZE};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

/// Callback for messages of one action
pub type ActionHandler = Arc<dyn Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync>;

/// Callback for messages carrying the error action
pub type ErrorCallback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct PendingCall {
    reply_tx: oneshot::Sender<Option<InboundMessage>>,
    /// Handle to abort the timeout task if the reply arrives
    timeout_handle: AbortHandle,
}

#[derive(Default)]
struct Dispatch {
    handlers: HashMap<String, Vec<(HandlerId, ActionHandler)>>,
    topics: HashMap<String, HandlerId>,
    error_callback: Option<ErrorCallback>,
}

impl Dispatch {
    fn remove(&mut self, id: HandlerId) -> bool {
        let mut removed = false;
        for list in self.handlers.values_mut() {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            removed |= list.len() != before;
        }
        self.handlers.retain(|_, list| !list.is_empty());
        removed
    }
}

pub struct CallCorrelator {
    channel: TransportChannel,
    pending: Arc<Mutex<HashMap<String, PendingCall>>>,
    dispatch: std::sync::Mutex<Dispatch>,
    next_handler: AtomicU64,
    error_action: String,
}

impl CallCorrelator {
    pub fn new(channel: TransportChannel, error_action: impl Into<String>) -> Self {
        CallCorrelator {
            channel,
            pending: Arc::new(Mutex::new(HashMap::new())),
            dispatch: std::sync::Mutex::new(Dispatch::default()),
            next_handler: AtomicU64::new(1),
            error_action: error_action.into(),
        }
    }

    pub fn channel(&self) -> &TransportChannel {
        &self.channel
    }

    fn dispatch_lock(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire-and-forget. Returns the request id if the message was written.
    pub fn send(&self, payload: Value) -> Option<String> {
        let action = action_of(&payload).to_string();
        let request_id = Uuid::new_v4().to_string();
        let Some(frame) = stamp(payload, self.channel.session_id(), &request_id) else {
            warn!(%action, "refusing to send non-object payload");
            return None;
        };
        match self.channel.send_text(frame) {
            Ok(()) => {
                trace!(%action, %request_id, "message sent");
                Some(request_id)
            }
            Err(e) => {
                debug!(%action, error = %e, "dropping message");
                crate::metrics::record_dropped_send();
                None
            }
        }
    }

    /// Send and wait for the correlated reply. `None` means no reply: the
    /// channel was closed, the send failed, or `timeout` elapsed.
    pub async fn send_and_wait(&self, payload: Value, timeout: Duration) -> Option<InboundMessage> {
        let action = action_of(&payload).to_string();
        if !self.channel.is_open() {
            debug!(%action, "channel not open, skipping call");
            crate::metrics::record_dropped_send();
            return None;
        }

        let request_id = Uuid::new_v4().to_string();
        let Some(frame) = stamp(payload, self.channel.session_id(), &request_id) else {
            warn!(%action, "refusing to send non-object payload");
            return None;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;

            // Set up timeout task with abort handle
            let pending_calls = self.pending.clone();
            let timeout_id = request_id.clone();
            let timeout_action = action.clone();
            let timeout_task = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(call) = pending_calls.lock().await.remove(&timeout_id) {
                    debug!(action = %timeout_action, request_id = %timeout_id, "call timed out");
                    crate::metrics::record_rpc_timeout(&timeout_action);
                    let _ = call.reply_tx.send(None);
                }
            });

            pending.insert(
                request_id.clone(),
                PendingCall {
                    reply_tx,
                    timeout_handle: timeout_task.abort_handle(),
                },
            );
        }

        crate::metrics::record_rpc_call(&action);
        if let Err(e) = self.channel.send_text(frame) {
            debug!(%action, error = %e, "send failed, abandoning call");
            if let Some(call) = self.pending.lock().await.remove(&request_id) {
                call.timeout_handle.abort();
            }
            return None;
        }

        reply_rx.await.ok().flatten()
    }

    /// Process one inbound frame
    pub async fn handle_frame(&self, frame: &str) {
        if frame.len() > MAX_FRAME_SIZE {
            warn!(size = frame.len(), "dropping oversized message");
            crate::metrics::record_malformed_frame();
            return;
        }
        let message = match InboundMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                crate::metrics::record_malformed_frame();
                return;
            }
        };

        if let Some(request_id) = &message.request_id {
            let call = self.pending.lock().await.remove(request_id);
            if let Some(call) = call {
                call.timeout_handle.abort();
                let _ = call.reply_tx.send(Some(message));
                return;
            }
        }

        self.dispatch_message(&message);
    }

    fn dispatch_message(&self, message: &InboundMessage) {
        let Some(action) = message.action.as_deref() else {
            trace!(request_id = ?message.request_id, "unmatched message without action");
            return;
        };

        let (handlers, error_callback) = {
            let dispatch = self.dispatch_lock();
            let handlers: Vec<ActionHandler> = [action, WILDCARD_ACTION]
                .iter()
                .filter_map(|key| dispatch.handlers.get(*key))
                .flat_map(|list| list.iter().map(|(_, h)| h.clone()))
                .collect();
            let error_callback = if action == self.error_action {
                dispatch.error_callback.clone()
            } else {
                None
            };
            (handlers, error_callback)
        };

        if handlers.is_empty() && error_callback.is_none() {
            trace!(action, "no handler for message");
        }

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(action, error = %e, "message handler failed");
                    crate::metrics::record_handler_failure();
                }
                Err(_) => {
                    error!(action, "message handler panicked");
                    crate::metrics::record_handler_failure();
                }
            }
        }

        if let Some(callback) = error_callback {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                error!(action, "error callback panicked");
            }
        }
    }

    /// Drain the channel's inbound queue until it closes
    pub fn spawn_dispatch(self: &Arc<Self>, mut inbound: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                this.handle_frame(&frame).await;
            }
            debug!("inbound queue closed");
        })
    }

    pub fn register_handler<F>(&self, action: &str, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::SeqCst));
        self.dispatch_lock()
            .handlers
            .entry(action.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        let mut dispatch = self.dispatch_lock();
        dispatch.topics.retain(|_, hid| *hid != id);
        dispatch.remove(id)
    }

    /// Install the single handler for `topic`, replacing any previous one
    pub fn subscribe_topic<F>(&self, topic: &str, action: &str, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::SeqCst));
        let mut dispatch = self.dispatch_lock();
        if let Some(previous) = dispatch.topics.remove(topic) {
            dispatch.remove(previous);
        }
        dispatch
            .handlers
            .entry(action.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        dispatch.topics.insert(topic.to_string(), id);
        id
    }

    pub fn unsubscribe_topic(&self, topic: &str) -> bool {
        let mut dispatch = self.dispatch_lock();
        match dispatch.topics.remove(topic) {
            Some(id) => dispatch.remove(id),
            None => false,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.dispatch_lock().topics.keys().cloned().collect()
    }

    pub fn set_error_callback(&self, callback: Option<ErrorCallback>) {
        self.dispatch_lock().error_callback = callback;
    }

    /// Get statistics about pending calls
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Resolve every pending call with no reply
    pub async fn cancel_pending(&self) {
        let calls: Vec<PendingCall> = self.pending.lock().await.drain().map(|(_, c)| c).collect();
        for call in calls {
            call.timeout_handle.abort();
            let _ = call.reply_tx.send(None);
        }
    }
}
