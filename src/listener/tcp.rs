//! Plain-TCP listener. One `tokio::net::TcpListener` per resolved bind
//! address, each fed by its own accept-loop task into a shared queue —
//! tokio's listener already does the readiness wait natively, so unlike the
//! source's `select()`-based polling loop each worker just awaits
//! `accept()` directly, one fewer polling interval to get right per socket.

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
use crate::transport::{tcp, ChannelProtocol};

type Accepted = Result<(TcpStream, SocketAddr), TransportError>;

pub struct TcpListenerAdapter {
    display_endpoint: String,
    platform: PlatformKind,
    accepted_rx: AsyncMutex<mpsc::UnboundedReceiver<Accepted>>,
    workers: Vec<JoinHandle<()>>,
}

impl TcpListenerAdapter {
    pub async fn bind(host: &str, port: u16, platform: PlatformKind) -> Result<Self, TransportError> {
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

        Ok(TcpListenerAdapter {
            display_endpoint,
            platform,
            accepted_rx: AsyncMutex::new(rx),
            workers,
        })
    }
}

#[async_trait]
impl Listener for TcpListenerAdapter {
    fn protocol(&self) -> ChannelProtocol {
        ChannelProtocol::Tcp
    }

    fn endpoint(&self) -> String {
        self.display_endpoint.clone()
    }

    fn platform(&self) -> PlatformKind {
        self.platform
    }

    async fn accept(&self, config: &Config) -> Result<Arc<Channel>, TransportError> {
        let mut rx = self.accepted_rx.lock().await;
        let outcome = rx
            .recv()
            .await
            .ok_or_else(|| TransportError::PeerClosed(self.display_endpoint.clone()))?;
        let (stream, remote) = outcome?;
        let transport = tcp::from_accepted(stream, remote);
        Ok(Channel::new(Box::new(transport), config.clone()))
    }

    /// The bound sockets close when the worker tasks are aborted; the
    /// `Arc<dyn Listener>` dropping out of the manager's map would reclaim
    /// them eventually anyway, but `kill`/`clear` call this to do it now.
    async fn stop(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
