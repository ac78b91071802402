/*
    transport - Duplex channel to the sync service

    Submodules:
    - connector: dialing trait and in-memory connection pair
    - tcp: length-prefixed frames over TCP
    - backoff: reconnect delay policy
    - network: host reachability signal
    - channel: the auto-reconnecting channel itself
*/

pub mod backoff;
pub mod channel;
pub mod connector;
pub mod errors;
pub mod network;
pub mod tcp;

pub use backoff::Backoff;
pub use channel::{ChannelState, DisconnectKind, TransportChannel};
pub use connector::{Connection, Connector};
pub use errors::{TransportError, TransportResult};
pub use network::NetworkMonitor;
pub use tcp::{TcpConnector, MAX_FRAME_SIZE};
