//! SRT connection management
//!
//! A [`Connector`] opens caller-mode connections; the resulting
//! [`Connection`] is read without blocking from the session's processing
//! cycle. The SRT implementation drives the socket on a background reader
//! task and hands received messages over a bounded channel.

use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use srt_tokio::SrtSocket;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::error::{PullError, Result};
use crate::locator::ConnectionParams;

/// Messages buffered between the reader task and the session
const READER_CHANNEL_CAPACITY: usize = 64;

/// Passphrase lengths SRT accepts for key derivation, in bytes
pub const PASSPHRASE_LEN: RangeInclusive<usize> = 10..=79;

/// Result of one non-blocking receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// `n` bytes were written to the buffer
    Data(usize),
    /// Nothing available right now
    WouldBlock,
    /// The remote closed the connection
    Closed,
    /// Receive failed
    Error(String),
}

/// OS-level descriptor a readiness-driven scheduler could wait on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollableDescriptor(pub i32);

/// Opens connections to a resolved source
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect with the given parameters
    ///
    /// # Errors
    ///
    /// [`PullError::ConnectFailure`] when allocation, resolution or the
    /// handshake fails. Partial resources are released before returning.
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Connection>>;
}

/// Live connection, exclusively owned by one session
pub trait Connection: Send {
    /// Receive without blocking into `buf`, up to its capacity
    fn receive(&mut self, buf: &mut Vec<u8>) -> ReceiveOutcome;

    /// Release the connection; idempotent
    fn close(&mut self);

    fn pollable_descriptor(&self) -> Option<PollableDescriptor>;
}

/// Caller-mode SRT connector backed by `srt-tokio`
#[derive(Debug, Clone)]
pub struct SrtConnector {
    recv_buffer_size: usize,
}

impl SrtConnector {
    pub fn new(recv_buffer_size: usize) -> Self {
        Self { recv_buffer_size }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| PullError::connect(format!("failed to resolve {}: {}", host, e)))?;

    addrs
        .next()
        .ok_or_else(|| PullError::connect(format!("no address found for {}", host)))
}

#[async_trait]
impl Connector for SrtConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Connection>> {
        let connect_timeout = params.connect_timeout;

        // srt-tokio panics on an out-of-range passphrase
        if let Some(passphrase) = &params.passphrase {
            if !PASSPHRASE_LEN.contains(&passphrase.len()) {
                return Err(PullError::connect(format!(
                    "passphrase must be {} to {} bytes, got {}",
                    PASSPHRASE_LEN.start(),
                    PASSPHRASE_LEN.end(),
                    passphrase.len()
                )));
            }
        }

        let attempt = async {
            let addr = resolve(&params.host, params.port).await?;

            tracing::debug!(
                %addr,
                latency_ms = params.latency.as_millis() as u64,
                encrypted = params.passphrase.is_some(),
                "Calling SRT origin"
            );

            let mut builder = SrtSocket::builder()
                .latency(params.latency)
                .set(|options| options.connect.timeout = connect_timeout);
            if let Some(passphrase) = &params.passphrase {
                builder = builder.encryption(0, passphrase.clone());
            }

            builder
                .call(addr, params.stream_id.as_deref())
                .await
                .map_err(|e| PullError::connect(format!("SRT handshake with {} failed: {}", addr, e)))
        };

        let socket = tokio::time::timeout(connect_timeout, attempt)
            .await
            .map_err(|_| {
                PullError::connect(format!(
                    "connection to {}:{} timed out after {:?}",
                    params.host, params.port, connect_timeout
                ))
            })??;

        Ok(Box::new(SrtConnection::spawn(socket, self.recv_buffer_size)))
    }
}

#[derive(Debug)]
enum ReaderItem {
    Data(Bytes),
    Error(String),
}

/// Connected SRT socket read through a background task
pub struct SrtConnection {
    rx: mpsc::Receiver<ReaderItem>,
    reader: Option<JoinHandle<()>>,
    pending: Option<ReaderItem>,
    recv_buffer_size: usize,
    closed: bool,
}

impl SrtConnection {
    fn spawn(mut socket: SrtSocket, recv_buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(READER_CHANNEL_CAPACITY);

        let reader = tokio::spawn(async move {
            let mut messages: u64 = 0;

            while let Some(result) = socket.next().await {
                let item = match result {
                    Ok((_, data)) => {
                        messages += 1;
                        ReaderItem::Data(data)
                    }
                    Err(e) => {
                        tracing::warn!("SRT receive error: {}", e);
                        ReaderItem::Error(e.to_string())
                    }
                };
                let failed = matches!(item, ReaderItem::Error(_));

                if tx.send(item).await.is_err() {
                    tracing::debug!("Connection dropped, stopping SRT read loop");
                    break;
                }
                if failed {
                    break;
                }
            }

            tracing::debug!(messages, "SRT read loop ended");
        });

        Self::from_parts(rx, Some(reader), recv_buffer_size)
    }

    fn from_parts(
        rx: mpsc::Receiver<ReaderItem>,
        reader: Option<JoinHandle<()>>,
        recv_buffer_size: usize,
    ) -> Self {
        Self {
            rx,
            reader,
            pending: None,
            recv_buffer_size: recv_buffer_size.max(1),
            closed: false,
        }
    }

    fn next_item(&mut self) -> std::result::Result<ReaderItem, TryRecvError> {
        match self.pending.take() {
            Some(item) => Ok(item),
            None => self.rx.try_recv(),
        }
    }
}

impl Connection for SrtConnection {
    fn receive(&mut self, buf: &mut Vec<u8>) -> ReceiveOutcome {
        buf.clear();
        if self.closed {
            return ReceiveOutcome::Closed;
        }

        // Coalesce queued messages up to the receive buffer size
        loop {
            match self.next_item() {
                Ok(ReaderItem::Data(chunk)) => {
                    if !buf.is_empty() && buf.len() + chunk.len() > self.recv_buffer_size {
                        self.pending = Some(ReaderItem::Data(chunk));
                        break;
                    }
                    buf.extend_from_slice(&chunk);
                    if buf.len() >= self.recv_buffer_size {
                        break;
                    }
                }
                Ok(ReaderItem::Error(reason)) => {
                    if buf.is_empty() {
                        return ReceiveOutcome::Error(reason);
                    }
                    self.pending = Some(ReaderItem::Error(reason));
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if buf.is_empty() {
                        return ReceiveOutcome::Closed;
                    }
                    break;
                }
            }
        }

        if buf.is_empty() {
            ReceiveOutcome::WouldBlock
        } else {
            ReceiveOutcome::Data(buf.len())
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending = None;
        self.rx.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn pollable_descriptor(&self) -> Option<PollableDescriptor> {
        // srt-tokio multiplexes over its own UDP socket
        None
    }
}

impl Drop for SrtConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn connection(recv_buffer_size: usize) -> (mpsc::Sender<ReaderItem>, SrtConnection) {
        let (tx, rx) = mpsc::channel(READER_CHANNEL_CAPACITY);
        (tx, SrtConnection::from_parts(rx, None, recv_buffer_size))
    }

    #[tokio::test]
    async fn test_receive_coalesces_up_to_capacity() {
        let (tx, mut conn) = connection(10);
        let mut buf = Vec::with_capacity(10);

        assert_eq!(conn.receive(&mut buf), ReceiveOutcome::WouldBlock);

        for chunk in [&b"abcd"[..], b"efgh", b"ijkl"] {
            tx.send(ReaderItem::Data(Bytes::copy_from_slice(chunk))).await.unwrap();
        }

        assert_eq!(conn.receive(&mut buf), ReceiveOutcome::Data(8));
        assert_eq!(buf, b"abcdefgh");

        assert_eq!(conn.receive(&mut buf), ReceiveOutcome::Data(4));
        assert_eq!(buf, b"ijkl");
    }

    #[tokio::test]
    async fn test_error_after_data_is_reported_next() {
        let (tx, mut conn) = connection(1316);
        let mut buf = Vec::new();

        tx.send(ReaderItem::Data(Bytes::from_static(b"ts"))).await.unwrap();
        tx.send(ReaderItem::Error("connection reset".into())).await.unwrap();
        drop(tx);

        assert_eq!(conn.receive(&mut buf), ReceiveOutcome::Data(2));
        assert_eq!(
            conn.receive(&mut buf),
            ReceiveOutcome::Error("connection reset".into())
        );
        assert_eq!(conn.receive(&mut buf), ReceiveOutcome::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, mut conn) = connection(1316);
        let mut buf = Vec::new();
        tx.send(ReaderItem::Data(Bytes::from_static(b"ts"))).await.unwrap();

        conn.close();
        conn.close();
        assert_eq!(conn.receive(&mut buf), ReceiveOutcome::Closed);
        assert!(conn.pollable_descriptor().is_none());
    }

    #[tokio::test]
    async fn test_resolve_literal_addresses() {
        assert_eq!(
            resolve("10.0.0.5", 9000).await.unwrap(),
            "10.0.0.5:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve("::1", 9000).await.unwrap(),
            "[::1]:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_connect_unreachable_times_out() {
        let connector = SrtConnector::new(1316);
        let params = ConnectionParams {
            host: "127.0.0.1".to_string(),
            port: 9,
            stream_id: Some("cam1".to_string()),
            passphrase: None,
            latency: Duration::from_millis(120),
            connect_timeout: Duration::from_millis(200),
        };

        let result = connector.connect(&params).await;
        assert!(matches!(result, Err(PullError::ConnectFailure { .. })));
    }

    #[tokio::test]
    async fn test_connect_rejects_out_of_range_passphrase() {
        let connector = SrtConnector::new(1316);
        for passphrase in ["short".to_string(), "x".repeat(80)] {
            let params = ConnectionParams {
                host: "127.0.0.1".to_string(),
                port: 9,
                stream_id: None,
                passphrase: Some(passphrase),
                latency: Duration::from_millis(120),
                connect_timeout: Duration::from_secs(5),
            };

            let result = connector.connect(&params).await;
            match result {
                Err(PullError::ConnectFailure { reason }) => assert!(reason.contains("passphrase")),
                other => panic!("expected ConnectFailure, got {:?}", other.map(|_| ())),
            }
        }
    }
}
