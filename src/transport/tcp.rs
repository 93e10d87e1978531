//! Plain TCP transport.

use std::net::SocketAddr;

use tokio::net::TcpStream;

use super::{ChannelProtocol, StreamTransport};
use crate::error::TransportError;

/// Resolve `host:port` to every candidate address, IPv6 first — matches the
/// source's family ordering, which tries IPv6 endpoints before IPv4 ones.
///
/// An empty host resolves to `::`, the dual-stack wildcard, so a listener
/// with no `--host` flag accepts both address families on platforms where
/// `bindv6only` is disabled.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let host = if host.is_empty() { "::" } else { host };
    let mut addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| TransportError::Resolve {
            host: host.to_string(),
            port,
        })?
        .collect();
    addrs.sort_by_key(|addr| match addr {
        SocketAddr::V6(_) => 0,
        SocketAddr::V4(_) => 1,
    });
    if addrs.is_empty() {
        return Err(TransportError::Resolve {
            host: host.to_string(),
            port,
        });
    }
    Ok(addrs)
}

/// Try every resolved candidate in order until one connects.
pub async fn connect(host: &str, port: u16) -> Result<StreamTransport, TransportError> {
    let candidates = resolve(host, port).await?;
    let mut last_err = None;
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(StreamTransport::new(
                    Box::new(stream),
                    addr.to_string(),
                    ChannelProtocol::Tcp,
                ));
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(TransportError::Connect {
        host: host.to_string(),
        port,
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "no candidate addresses")
        }),
    })
}

/// Wrap an already-accepted socket (listener side).
pub fn from_accepted(stream: TcpStream, remote: SocketAddr) -> StreamTransport {
    let _ = stream.set_nodelay(true);
    StreamTransport::new(Box::new(stream), remote.to_string(), ChannelProtocol::Tcp)
}
