/*
    errors.rs - Error types for the transport layer

    None of these are fatal: the channel logs them and folds them into its
    disconnect/reconnect path.
*/

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing the endpoint failed
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Dialing did not finish in time
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer announced a frame above the limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame payload is not UTF-8 text
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// Send attempted while the channel is not open
    #[error("Channel is not connected")]
    NotConnected,
}

pub type TransportResult<T> = Result<T, TransportError>;
