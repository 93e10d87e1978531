//! Download/upload fidelity against a scripted in-process shell: the mock
//! answers each transaction in the exact sequence `LinuxPlatform::download`/
//! `upload` issues them (probe, then body; touch, then write chunk(s), then
//! decode) without needing a real POSIX box on the other end.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use redcat_rs::channel::Channel;
use redcat_rs::config::Config;
use redcat_rs::platform::{self, Platform, PlatformKind};
use redcat_rs::transport::{ChannelProtocol, StreamTransport};

fn parse_tokens(buf: &[u8]) -> Option<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let text = std::str::from_utf8(buf).ok()?;
    let rest = text.strip_prefix("echo ")?;
    let (start, rest) = rest.split_once(';')?;
    let (_payload, rest) = rest.split_once(" && echo ")?;
    let (control, rest) = rest.split_once("; echo ")?;
    let end = rest.trim_end_matches(['\n', '\r']);
    Some((start.as_bytes().to_vec(), control.as_bytes().to_vec(), end.as_bytes().to_vec()))
}

async fn recv_command(server: &mut tokio::io::DuplexStream) -> Vec<u8> {
    use tokio::io::AsyncReadExt;
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = server.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.ends_with(b"\n") {
            break;
        }
    }
    data
}

/// Serve a fixed sequence of transactions in order, each answered with the
/// output the caller scripted for it. `handle_echo` is always `false` here
/// because that's what `download`/`upload` pass to every transaction they
/// build, so the mock never echoes the raw command back.
async fn serve_scripted(mut server: tokio::io::DuplexStream, responses: Vec<(bool, String)>) {
    use tokio::io::AsyncWriteExt;
    for (ok, output) in responses {
        let received = recv_command(&mut server).await;
        if received.is_empty() {
            return;
        }
        let Some((start, control, end)) = parse_tokens(&received) else {
            return;
        };
        let mut response = Vec::new();
        response.extend_from_slice(&start);
        response.push(b'\n');
        response.extend_from_slice(output.as_bytes());
        response.push(b'\n');
        if ok {
            response.extend_from_slice(&control);
            response.push(b'\n');
        }
        response.extend_from_slice(&end);
        response.push(b'\n');
        if server.write_all(&response).await.is_err() {
            return;
        }
    }
}

fn open_pair() -> (std::sync::Arc<Channel>, tokio::io::DuplexStream) {
    let (client, server) = tokio::io::duplex(32 * 1024);
    let transport = StreamTransport::new(Box::new(client), "test-peer".to_string(), ChannelProtocol::Tcp);
    let channel = Channel::new(Box::new(transport), Config::default());
    (channel, server)
}

#[tokio::test]
async fn download_recovers_the_exact_remote_bytes() {
    let original = b"hello from the remote filesystem\n".to_vec();
    let encoded = BASE64.encode(&original);

    let (channel, server) = open_pair();
    channel.open().await.unwrap();
    let shell = tokio::spawn(serve_scripted(server, vec![(true, String::new()), (true, encoded)]));

    let platform = platform::build(PlatformKind::Linux, channel);
    let (ok, message, data) = platform.download("/etc/fixture").await;

    assert!(ok, "download should succeed: {message}");
    assert_eq!(data, Bytes::from(original));
    shell.await.unwrap();
}

#[tokio::test]
async fn download_surfaces_probe_failure_without_attempting_base64() {
    let (channel, server) = open_pair();
    channel.open().await.unwrap();
    let shell = tokio::spawn(serve_scripted(server, vec![(false, "no such file".to_string())]));

    let platform = platform::build(PlatformKind::Linux, channel);
    let (ok, message, data) = platform.download("/nonexistent").await;

    assert!(!ok);
    assert!(data.is_empty());
    assert!(message.contains("nonexistent") || !message.is_empty());
    shell.await.unwrap();
}

#[tokio::test]
async fn upload_round_trips_small_payload_through_touch_write_decode() {
    let payload = Bytes::from_static(b"round trip me");

    let (channel, server) = open_pair();
    channel.open().await.unwrap();
    // touch, one write chunk (payload is tiny, well under POSIX_UPLOAD_CHUNK), decode.
    let shell = tokio::spawn(serve_scripted(
        server,
        vec![(true, String::new()), (true, String::new()), (true, String::new())],
    ));

    let platform = platform::build(PlatformKind::Linux, channel);
    let (ok, message) = platform.upload("/tmp/uploaded", payload).await;

    assert!(ok, "upload should succeed: {message}");
    shell.await.unwrap();
}
