//! Exercises the transaction executor against an in-process fake shell
//! connected over a `tokio::io::duplex` pair, standing in for a real socket.

use std::time::Duration;

use redcat_rs::channel::Channel;
use redcat_rs::config::Config;
use redcat_rs::platform::{self, PlatformKind};
use redcat_rs::transaction::Transaction;
use redcat_rs::transport::{ChannelProtocol, StreamTransport};

/// Pull the random `S`/`C`/`E` tokens back out of a POSIX-framed command
/// buffer (`echo S;P && echo C; echo E\n`) so the fake shell can play them
/// back without knowing them in advance.
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
    let mut buf = [0u8; 4096];
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

/// Answer exactly one transaction: optionally echo the raw command back
/// first (simulating a non-raw tty), then emit the scripted output bracketed
/// by the real tokens it just parsed out of the command it received.
async fn answer_one(server: &mut tokio::io::DuplexStream, echo_first: bool, output: &[u8]) {
    use tokio::io::AsyncWriteExt;
    let received = recv_command(server).await;
    if echo_first {
        let _ = server.write_all(&received).await;
    }
    let Some((start, control, end)) = parse_tokens(&received) else {
        return;
    };
    let mut response = Vec::new();
    response.extend_from_slice(&start);
    response.push(b'\n');
    response.extend_from_slice(output);
    response.push(b'\n');
    response.extend_from_slice(&control);
    response.push(b'\n');
    response.extend_from_slice(&end);
    response.push(b'\n');
    let _ = server.write_all(&response).await;
}

fn open_pair() -> (std::sync::Arc<Channel>, tokio::io::DuplexStream) {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let transport = StreamTransport::new(Box::new(client), "test-peer".to_string(), ChannelProtocol::Tcp);
    let channel = Channel::new(Box::new(transport), Config::default());
    (channel, server)
}

#[tokio::test]
async fn transaction_recovers_output_through_echoing_shell() {
    let (channel, mut server) = open_pair();
    channel.open().await.expect("open never fails for an already-connected transport");

    let shell = tokio::spawn(async move {
        answer_one(&mut server, true, b"result-line").await;
    });

    let platform = platform::build(PlatformKind::Linux, channel);
    let transaction = Transaction::new(b"some command", platform.as_ref(), true, Duration::from_secs(5));
    let (cmd_ok, data) = transaction.execute(platform.as_ref()).await.expect("transaction should complete");

    assert!(cmd_ok);
    assert!(String::from_utf8_lossy(&data).contains("result-line"));
    shell.await.unwrap();
}

/// Running the same logical command through a cooperative echoing shell
/// (`handle_echo = true`) and a pre-raw shell that never echoes
/// (`handle_echo = false`) must recover byte-identical output.
#[tokio::test]
async fn echo_handling_is_independent_of_extracted_output() {
    let (channel_a, mut server_a) = open_pair();
    channel_a.open().await.unwrap();
    let shell_a = tokio::spawn(async move {
        answer_one(&mut server_a, true, b"same output").await;
    });
    let platform_a = platform::build(PlatformKind::Linux, channel_a);
    let transaction_a = Transaction::new(b"cmd", platform_a.as_ref(), true, Duration::from_secs(5));
    let (ok_a, data_a) = transaction_a.execute(platform_a.as_ref()).await.unwrap();
    shell_a.await.unwrap();

    let (channel_b, mut server_b) = open_pair();
    channel_b.open().await.unwrap();
    let shell_b = tokio::spawn(async move {
        answer_one(&mut server_b, false, b"same output").await;
    });
    let platform_b = platform::build(PlatformKind::Linux, channel_b);
    let transaction_b = Transaction::new(b"cmd", platform_b.as_ref(), false, Duration::from_secs(5));
    let (ok_b, data_b) = transaction_b.execute(platform_b.as_ref()).await.unwrap();
    shell_b.await.unwrap();

    assert!(ok_a && ok_b);
    assert_eq!(data_a, data_b);
}

#[tokio::test]
async fn close_is_idempotent() {
    let (channel, _server) = open_pair();
    channel.open().await.unwrap();
    channel.close().await;
    channel.close().await;
    assert!(!channel.is_open());
}
