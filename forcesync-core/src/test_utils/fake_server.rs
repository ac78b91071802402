//! Scriptable sync service for tests
//!
//! Accepts connections from a `MemoryConnector`, records every JSON message
//! it receives and answers through a replaceable responder closure. Tests
//! can also push unsolicited messages and cut the live connection.

use super::memory_connector::MemoryConnector;
use crate::transport::Connection;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

/// Maps one received message to the replies sent back
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

struct LiveConnection {
    outbound: mpsc::UnboundedSender<String>,
    task: AbortHandle,
}

struct ServerState {
    received: Mutex<Vec<Value>>,
    responder: Mutex<Responder>,
    live: Mutex<Option<LiveConnection>>,
    connections: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServerState {
    fn serve(self: &Arc<Self>, connection: Connection) {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let outbound = connection.outbound.clone();
        let reply_tx = connection.outbound;
        let mut inbound = connection.inbound;
        let state = self.clone();

        let task = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let Ok(message) = serde_json::from_str::<Value>(&frame) else {
                    continue;
                };
                lock(&state.received).push(message.clone());
                let responder = lock(&state.responder).clone();
                for reply in responder(&message) {
                    let _ = reply_tx.send(reply.to_string());
                }
            }
        });

        *lock(&self.live) = Some(LiveConnection {
            outbound,
            task: task.abort_handle(),
        });
    }
}

pub struct FakeServer {
    connector: Arc<MemoryConnector>,
    state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl FakeServer {
    /// Start accepting connections. Must run inside a tokio runtime.
    pub fn start() -> Self {
        let (connector, mut accepted) = MemoryConnector::new();
        let state = Arc::new(ServerState {
            received: Mutex::new(Vec::new()),
            responder: Mutex::new(Arc::new(|_: &Value| Vec::new())),
            live: Mutex::new(None),
            connections: AtomicU64::new(0),
        });

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Some(connection) = accepted.recv().await {
                accept_state.serve(connection);
            }
        });

        FakeServer {
            connector,
            state,
            accept_task,
        }
    }

    pub fn connector(&self) -> Arc<MemoryConnector> {
        self.connector.clone()
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&Value) -> Vec<Value> + Send + Sync + 'static,
    {
        *lock(&self.state.responder) = Arc::new(responder);
    }

    /// Every message received so far, oldest first
    pub fn received(&self) -> Vec<Value> {
        lock(&self.state.received).clone()
    }

    pub fn received_action(&self, action: &str) -> Vec<Value> {
        lock(&self.state.received)
            .iter()
            .filter(|m| m["action"] == action)
            .cloned()
            .collect()
    }

    pub fn clear_received(&self) {
        lock(&self.state.received).clear();
    }

    pub fn connection_count(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Send an unsolicited message on the live connection
    pub fn push(&self, message: Value) -> bool {
        match lock(&self.state.live).as_ref() {
            Some(live) => live.outbound.send(message.to_string()).is_ok(),
            None => false,
        }
    }

    /// Close the live connection from the server side
    pub fn drop_connection(&self) {
        if let Some(live) = lock(&self.state.live).take() {
            live.task.abort();
        }
    }

    /// Poll until `count` messages with `action` arrived or `timeout` passed
    pub async fn wait_for_messages(&self, action: &str, count: usize, timeout: Duration) -> Vec<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            let messages = self.received_action(action);
            if messages.len() >= count || Instant::now() >= deadline {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Build a reply correlated with `request`
    pub fn reply_to(request: &Value, mut body: Value) -> Value {
        body["requestId"] = request["requestId"].clone();
        body
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connection();
    }
}
