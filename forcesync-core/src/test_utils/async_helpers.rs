//! Async test helpers
//!
//! Timeout wrappers for channels and futures, plus waiters for the
//! transport channel's published state.

use crate::transport::{ChannelState, TransportChannel};
use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that should fail fast (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Helper for receiving from a channel with a timeout
pub async fn recv_timeout<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Receive one text frame and decode it as JSON
pub async fn recv_json(
    rx: &mut mpsc::UnboundedReceiver<String>,
    duration: Duration,
) -> Result<Value, RecvTimeoutError> {
    let frame = recv_timeout(rx, duration).await?;
    serde_json::from_str(&frame).map_err(|_| RecvTimeoutError::Closed)
}

/// Wait until the channel publishes a state matching `predicate`
pub async fn wait_for_state<F>(channel: &TransportChannel, duration: Duration, predicate: F) -> bool
where
    F: FnMut(&ChannelState) -> bool,
{
    let mut rx = channel.subscribe_state();
    let reached = matches!(timeout(duration, rx.wait_for(predicate)).await, Ok(Ok(_)));
    reached
}

/// Helper to assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Helper to assert a future does NOT complete within duration
pub async fn assert_times_out<F, T>(duration: Duration, future: F)
where
    F: Future<Output = T>,
{
    if timeout(duration, future).await.is_ok() {
        panic!("Expected future to timeout, but it completed within {:?}", duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_timeout_success() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(42).unwrap();

        let result = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout_times_out() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<i32>();

        let result = recv_timeout(&mut rx, SHORT_TEST_TIMEOUT).await;
        assert_eq!(result.unwrap_err(), RecvTimeoutError::Timeout);
    }

    #[tokio::test]
    async fn test_recv_json() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send("{\"action\":\"register\"}".to_string()).unwrap();
        let value = recv_json(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap();
        assert_eq!(value["action"], "register");

        drop(tx);
        assert_eq!(
            recv_json(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap_err(),
            RecvTimeoutError::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_helpers() {
        let value = assert_completes_within(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        })
        .await;
        assert_eq!(value, 42);

        assert_times_out(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_secs(10)),
        )
        .await;
    }
}
