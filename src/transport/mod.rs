//! Byte transport: async send, readiness-polled recv, clean teardown.
//!
//! Two concrete variants share one interface: plain TCP and TLS-over-TCP.
//! Both are implemented on top of a single [`StreamTransport`] that holds a
//! boxed `AsyncRead + AsyncWrite` stream — the protocol-specific code (in
//! `tcp.rs` / `tls.rs`) only has to know how to *produce* that stream.

pub mod tcp;
pub mod tls;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::TransportError;

/// How a channel identifies its wire protocol, both internally and in
/// `show sessions`/`show listeners` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelProtocol {
    Tcp,
    Tls,
}

impl ChannelProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelProtocol::Tcp => "tcp",
            ChannelProtocol::Tls => "tls",
        }
    }
}

/// Single read buffer size per `recv` call, matching the source's `recv(4096)`.
const RECV_BUF_SIZE: usize = 4096;

/// Blanket bound for anything we can box as a bidirectional byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

#[async_trait]
pub trait Transport: Send + Sync {
    /// `host:port` (or accepted peer address) this transport talks to.
    fn remote(&self) -> String;

    fn protocol(&self) -> ChannelProtocol;

    /// Write the full buffer. Partial writes are the transport's problem —
    /// this loops internally rather than surfacing a partial-write outcome.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Readiness-poll with a bounded cap. Returns `Ok(empty)` when no data
    /// arrived within `poll_cap`; `Err` on peer-closed or I/O error.
    async fn recv(&self, poll_cap: Duration) -> Result<Bytes, TransportError>;

    /// Half-close then close. Idempotent: a second call is a no-op.
    async fn close(&self);
}

/// Shared implementation over a boxed stream. `connect`/`accept` logic lives
/// in the protocol-specific modules; everything downstream of "I have an
/// open stream" is identical between TCP and TLS.
pub struct StreamTransport {
    inner: Mutex<Option<Box<dyn AsyncStream>>>,
    remote: String,
    protocol: ChannelProtocol,
}

impl StreamTransport {
    pub fn new(stream: Box<dyn AsyncStream>, remote: String, protocol: ChannelProtocol) -> Self {
        StreamTransport {
            inner: Mutex::new(Some(stream)),
            remote,
            protocol,
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn remote(&self) -> String {
        self.remote.clone()
    }

    fn protocol(&self) -> ChannelProtocol {
        self.protocol
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(stream) => stream.write_all(data).await.map_err(TransportError::from),
            None => Err(TransportError::NotOpen),
        }
    }

    async fn recv(&self, poll_cap: Duration) -> Result<Bytes, TransportError> {
        let mut guard = self.inner.lock().await;
        let stream = match guard.as_mut() {
            Some(stream) => stream,
            None => return Err(TransportError::NotOpen),
        };
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        match tokio::time::timeout(poll_cap, stream.read(&mut buf)).await {
            // No readiness within the poll cap: not an error, just nothing yet.
            Err(_elapsed) => Ok(Bytes::new()),
            Ok(Ok(0)) => Err(TransportError::PeerClosed(self.remote.clone())),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Ok(Err(err)) => Err(TransportError::Io(err)),
        }
    }

    async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut stream) = guard.take() {
            let _ = stream.shutdown().await;
        }
    }
}
