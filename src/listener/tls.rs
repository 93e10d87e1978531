//! TLS listener: same multi-socket accept fan-in as
//! [`tcp::TcpListenerAdapter`], but a failed handshake must not take the
//! listener down — only that one peer.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::{resolve_bind_addrs, Listener};
use crate::channel::Channel;
use crate::config::Config;
use crate::error::TransportError;
use crate::platform::PlatformKind;
use crate::transport::tls::{self, TlsOptions};
use crate::transport::ChannelProtocol;

type Accepted = Result<(TcpStream, SocketAddr), TransportError>;

pub struct TlsListenerAdapter {
    display_endpoint: String,
    platform: PlatformKind,
    opts: TlsOptions,
    accepted_rx: AsyncMutex<mpsc::UnboundedReceiver<Accepted>>,
    workers: Vec<JoinHandle<()>>,
}

impl TlsListenerAdapter {
    pub async fn bind(host: &str, port: u16, platform: PlatformKind, opts: TlsOptions) -> Result<Self, TransportError> {
        let addrs = resolve_bind_addrs(host, port).await?;
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match TokioTcpListener::bind(addr).await {
                Ok(socket) => sockets.push(socket),
                Err(err) => log::warn!("failed to bind {addr}: {err}"),
            }
        }
        if sockets.is_empty() {
            return Err(TransportError::Resolve {
                host: host.to_string(),
                port,
            });
        }
        let display_endpoint = sockets[0]
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("{host}:{port}"));

        let (tx, rx) = mpsc::unbounded_channel();
        let workers = sockets
            .into_iter()
            .map(|socket| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    loop {
                        let outcome = socket.accept().await.map_err(TransportError::from);
                        let stop = outcome.is_err();
                        if tx.send(outcome).is_err() || stop {
                            break;
                        }
                    }
                })
            })
            .collect();

        Ok(TlsListenerAdapter {
            display_endpoint,
            platform,
            opts,
            accepted_rx: AsyncMutex::new(rx),
            workers,
        })
    }
}

#[async_trait]
impl Listener for TlsListenerAdapter {
    fn protocol(&self) -> ChannelProtocol {
        ChannelProtocol::Tls
    }

    fn endpoint(&self) -> String {
        self.display_endpoint.clone()
    }

    fn platform(&self) -> PlatformKind {
        self.platform
    }

    async fn accept(&self, config: &Config) -> Result<Arc<Channel>, TransportError> {
        let mut rx = self.accepted_rx.lock().await;
        loop {
            let outcome = rx
                .recv()
                .await
                .ok_or_else(|| TransportError::PeerClosed(self.display_endpoint.clone()))?;
            let (stream, remote) = outcome?;
            match tls::from_accepted(stream, remote, &self.opts).await {
                Ok(transport) => return Ok(Channel::new(Box::new(transport), config.clone())),
                Err(err) => log::warn!("tls handshake with {remote} failed: {err}"),
            }
        }
    }

    async fn stop(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
