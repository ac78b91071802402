/*
    connector.rs - Dialing abstraction under the transport channel

    A connector turns an endpoint string into a `Connection`: two unbounded
    queues of text frames. The channel never touches sockets itself, which
    keeps it testable against in-memory peers.

    Connection lifetime:
    - the peer closing shows up as `inbound.recv()` returning `None`
    - dropping the `Connection` closes it from our side
*/

use super::errors::TransportResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl Connection {
    /// Two connected in-memory ends
    pub fn pair() -> (Connection, Connection) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Connection { outbound: a_tx, inbound: b_rx },
            Connection { outbound: b_tx, inbound: a_rx },
        )
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> TransportResult<Connection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_cross_wired() {
        let (client, mut server) = Connection::pair();
        client.outbound.send("ping".to_string()).unwrap();
        assert_eq!(server.inbound.recv().await.as_deref(), Some("ping"));

        drop(client);
        assert!(server.inbound.recv().await.is_none());
    }
}
