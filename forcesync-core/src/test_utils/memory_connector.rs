//! In-memory connector
//!
//! Hands the client side of a `Connection::pair` to the transport channel and
//! queues the server side for the test (or `FakeServer`) to pick up.

use crate::transport::{Connection, Connector, TransportError, TransportResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<Connection>,
    refuse: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

impl MemoryConnector {
    /// Create a connector and the queue of server-side connection ends
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Connection>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector {
            accept_tx,
            refuse: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        };
        (Arc::new(connector), accept_rx)
    }

    /// Make every following dial fail (or succeed again)
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Times of every dial, successful or not
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> TransportResult<Connection> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (client, server) = Connection::pair();
        self.accept_tx.send(server).map_err(|_| TransportError::Connect {
            endpoint: endpoint.to_string(),
            reason: "no listener".to_string(),
        })?;
        Ok(client)
    }
}
