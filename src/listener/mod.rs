//! Listeners: accept-loop wrappers around the TCP/TLS transports, producing
//! ready-to-open channels for the manager.

pub mod tcp;
pub mod tls;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::config::Config;
use crate::error::TransportError;
use crate::platform::PlatformKind;
use crate::transport::ChannelProtocol;

/// Resolve a bind host to every local address it should listen on. An empty
/// host means "everywhere", which here means one socket per wildcard family
/// (`0.0.0.0` and `::`) rather than trusting a single dual-stack bind to
/// cover both, since `IPV6_V6ONLY` defaults vary by platform. A named host
/// resolves through DNS and gets one socket per distinct address, mirroring
/// `original_source/redcat/listener/tcplistener.py`'s per-`(family, endpoint)`
/// socket set.
pub(crate) async fn resolve_bind_addrs(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    if host.is_empty() {
        return Ok(vec![
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        ]);
    }
    let mut addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| TransportError::Resolve {
            host: host.to_string(),
            port,
        })?
        .collect();
    addrs.sort_by_key(|addr| (addr.is_ipv6(), addr.to_string()));
    addrs.dedup();
    if addrs.is_empty() {
        return Err(TransportError::Resolve {
            host: host.to_string(),
            port,
        });
    }
    Ok(addrs)
}

/// One accepted connection, paired with the platform it should be treated
/// as — the CLI chooses the platform at `listen` time, since there's no way
/// to probe a bind-and-wait listener for what's about to dial in.
pub struct Accepted {
    pub channel: Arc<Channel>,
    pub platform: PlatformKind,
}

#[async_trait]
pub trait Listener: Send + Sync {
    fn protocol(&self) -> ChannelProtocol;

    fn endpoint(&self) -> String;

    fn platform(&self) -> PlatformKind;

    /// Accept exactly one connection. Listener implementations own their own
    /// internal accept-loop polling; the caller (background task or
    /// `listen_once`) just awaits this once per desired session.
    async fn accept(&self, config: &Config) -> Result<Arc<Channel>, TransportError>;

    async fn stop(&self);
}
