/*
  TcpConnector - length-prefixed JSON frames over TCP

  Every frame is a 4-byte big-endian length followed by that many bytes of
  UTF-8 text. Frames above MAX_FRAME_SIZE are refused on read, which ends
  the connection.

  Each dialed socket gets two tasks:
    - writer: drains the outbound queue onto the socket
    - reader: decodes frames into the inbound queue, exits when the
      consumer drops the queue or the peer closes the socket
*/

use super::connector::{Connection, Connector};
use super::errors::{TransportError, TransportResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Largest accepted frame (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Write one frame: 4-byte length prefix + data
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> TransportResult<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> TransportResult<Option<String>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map(Some).map_err(|_| TransportError::InvalidUtf8)
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        TcpConnector { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        TcpConnector::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &str) -> TransportResult<Connection> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| TransportError::ConnectTimeout(endpoint.to_string()))?
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(writer, out_rx));
        tokio::spawn(read_loop(reader, in_tx));

        debug!(endpoint, "tcp connection established");
        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, text.as_bytes()).await {
            debug!(error = %e, "tcp write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<String>) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(text)) => {
                    if tx.send(text).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "dropping tcp connection");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_cross_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let frame = read_frame(&mut socket).await.unwrap().unwrap();
            write_frame(&mut socket, format!("echo:{}", frame).as_bytes()).await.unwrap();
        });

        let mut conn = TcpConnector::default().connect(&addr).await.unwrap();
        conn.outbound.send("{\"action\":\"register\"}".to_string()).unwrap();

        let reply = conn.inbound.recv().await.unwrap();
        assert_eq!(reply, "echo:{\"action\":\"register\"}");

        server.await.unwrap();
        assert!(conn.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let len = (MAX_FRAME_SIZE as u32) + 1;
            socket.write_all(&len.to_be_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut conn = TcpConnector::default().connect(&addr).await.unwrap();
        assert!(conn.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpConnector::default().connect(&addr).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_invalid_utf8() {
        let mut data: Vec<u8> = Vec::new();
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&[0xff, 0xfe]);
        let mut cursor = std::io::Cursor::new(data);
        assert!(matches!(read_frame(&mut cursor).await, Err(TransportError::InvalidUtf8)));
    }
}
