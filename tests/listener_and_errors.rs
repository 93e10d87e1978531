//! Covers the two pieces the manager's reaper depends on: a listener that
//! actually accepts real TCP connections, and a channel that reports failure
//! through its error callback exactly once instead of closing itself.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use redcat_rs::channel::{Channel, ChannelState};
use redcat_rs::config::Config;
use redcat_rs::error::TransportError;
use redcat_rs::listener::tcp::TcpListenerAdapter;
use redcat_rs::listener::Listener;
use redcat_rs::platform::PlatformKind;
use redcat_rs::transport::Transport;

#[tokio::test]
async fn background_listener_accepts_a_real_connection() {
    let listener = TcpListenerAdapter::bind("127.0.0.1", 0, PlatformKind::Linux)
        .await
        .expect("binding an ephemeral port should never fail");
    let endpoint = listener.endpoint();

    let dialer = tokio::spawn(async move {
        let mut stream = tokio::net::TcpStream::connect(endpoint).await.expect("connect to our own listener");
        use tokio::io::AsyncWriteExt;
        stream.write_all(b"hello").await.unwrap();
        stream
    });

    let config = Config::default();
    let channel = listener.accept(&config).await.expect("accept should succeed");
    channel.open().await.expect("opening a freshly accepted channel should never fail");
    assert!(channel.is_open());

    let _stream = dialer.await.unwrap();
}

/// A transport whose `recv` always fails, standing in for a peer that died
/// mid-connection.
struct DeadTransport;

#[async_trait]
impl Transport for DeadTransport {
    fn remote(&self) -> String {
        "dead-peer".to_string()
    }

    async fn send(&self, _data: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn recv(&self, _poll_cap: Duration) -> Result<Bytes, TransportError> {
        Err(TransportError::PeerClosed("dead-peer".to_string()))
    }

    async fn close(&self) {}
}

#[tokio::test]
async fn channel_reports_failure_through_error_callback_without_self_closing() {
    let channel = Channel::new(Box::new(DeadTransport), Config::default());
    channel.open().await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    channel.set_error_callback(Arc::new(move |_err: String| {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    }));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while fired.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(channel.state(), ChannelState::Error);
    // the channel reported the failure but did not tear down the transport
    // itself; only an explicit close() (the reaper's job, in production) does.
    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);
}
