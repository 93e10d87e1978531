//! `cmd.exe` adapter. Framing and line endings differ from POSIX (`&` instead
//! of `&&` chaining outside the guarded command, `\r`/`\r\n` line endings),
//! and there's no bundled PTY helper to spawn — the "raindrop" upgrade stays
//! an opaque remote binary this crate never ships (§ Design Notes).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use crate::channel::Channel;
use crate::config::WINDOWS_UPLOAD_CHUNK;
use crate::platform::{Platform, PlatformKind};
use crate::style;
use crate::transaction::Transaction;

pub struct WindowsPlatform {
    channel: Arc<Channel>,
    has_pty: AtomicBool,
    interactive: AtomicBool,
}

impl WindowsPlatform {
    pub fn new(channel: Arc<Channel>) -> Self {
        WindowsPlatform {
            channel,
            has_pty: AtomicBool::new(false),
            interactive: AtomicBool::new(false),
        }
    }

    async fn send_line(&self, cmd: &str, wait_for: Duration) {
        let _ = self.channel.send(format!("{cmd}\r\n").as_bytes()).await;
        tokio::time::sleep(wait_for).await;
    }
}

#[async_trait]
impl Platform for WindowsPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Windows
    }

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn is_interactive(&self) -> bool {
        self.interactive.load(Ordering::SeqCst)
    }

    /// Without the raindrop helper (never shipped, see module docs) this
    /// platform can't get a real PTY, so "interactive" degrades to raw
    /// keystroke passthrough over the plain `cmd.exe` the channel already
    /// has — the only path the source takes when `_has_pty` is false.
    async fn interactive(&self, value: bool, _session_label: &str) -> bool {
        if value == self.is_interactive() {
            return true;
        }
        if self.has_pty.load(Ordering::SeqCst) {
            if value {
                self.send_line("exit", Duration::from_millis(50)).await;
                self.send_line("\x03", Duration::from_millis(50)).await;
                self.channel.wait_data(Duration::from_secs(1)).await;
                self.channel.purge();
                let _ = self.channel.send(b"cls\r").await;
                let _ = crossterm::terminal::enable_raw_mode();
                self.interactive.store(true, Ordering::SeqCst);
            } else {
                self.send_line("\x03", Duration::from_millis(50)).await;
                if self.channel.is_open() {
                    self.send_line("cmd", Duration::from_millis(100)).await;
                    self.send_line("set PROMPT= ", Duration::from_millis(50)).await;
                    self.channel.wait_data(Duration::from_secs(1)).await;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    self.channel.purge();
                    let _ = crossterm::terminal::disable_raw_mode();
                }
                self.interactive.store(false, Ordering::SeqCst);
            }
        } else {
            self.channel.wait_data(Duration::from_millis(300)).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.interactive.store(value, Ordering::SeqCst);
            self.channel.purge();
            let _ = self.channel.send(b"\r\n").await;
        }
        true
    }

    async fn whoami(&self) -> (bool, bool, String) {
        self.channel.purge();
        let transaction = Transaction::new(b"whoami", self, true, Duration::from_secs(30));
        let (ok, cmd_ok, data) = transaction.execute_triple(self).await;
        let text = if cmd_ok { clean(&data) } else { String::new() };
        (ok, cmd_ok, text)
    }

    async fn hostname(&self) -> (bool, bool, String) {
        self.channel.purge();
        let transaction = Transaction::new(b"hostname", self, true, Duration::from_secs(30));
        let (ok, cmd_ok, data) = transaction.execute_triple(self).await;
        let text = if cmd_ok { clean(&data) } else { String::new() };
        (ok, cmd_ok, text)
    }

    async fn download(&self, rfile: &str) -> (bool, String, Bytes) {
        self.channel.purge();
        let guard = self.channel.transaction_lock().acquire().await;
        let probe = Transaction::new(format!("dir {rfile}").as_bytes(), self, true, Duration::from_secs(30));
        let (probe_ok, probe_data) = match probe.execute_locked(&self.channel, &guard).await {
            Ok(result) => result,
            Err(_) => (false, Bytes::new()),
        };
        if !probe_ok {
            return (
                false,
                style::bold(&format!(
                    "can't download {}: {}",
                    style::red(rfile),
                    String::from_utf8_lossy(&probe_data)
                )),
                Bytes::new(),
            );
        }
        let cmd = format!("powershell -c \"[System.Convert]::ToBase64String([System.IO.File]::ReadAllBytes('{rfile}'))\"");
        let body = Transaction::new(cmd.as_bytes(), self, true, Duration::from_secs(60));
        let (cmd_ok, data) = match body.execute_locked(&self.channel, &guard).await {
            Ok(result) => result,
            Err(_) => (false, Bytes::new()),
        };
        if !cmd_ok {
            return (
                false,
                style::bold(&format!(
                    "failed to download {}: {}",
                    style::red(rfile),
                    String::from_utf8_lossy(&data)
                )),
                Bytes::new(),
            );
        }
        match BASE64.decode(strip_whitespace(&data)) {
            Ok(decoded) => (true, String::new(), Bytes::from(decoded)),
            Err(_) => (
                false,
                style::bold(&format!("failed to download {}: malformed base64", style::red(rfile))),
                Bytes::new(),
            ),
        }
    }

    async fn upload(&self, rfile: &str, data: Bytes) -> (bool, String) {
        self.channel.purge();
        let encoded = BASE64.encode(&data);
        let chunks: Vec<&str> = encoded
            .as_bytes()
            .chunks(WINDOWS_UPLOAD_CHUNK)
            .map(|c| std::str::from_utf8(c).expect("base64 is ascii"))
            .collect();
        let guard = self.channel.transaction_lock().acquire().await;
        let tmp_file = temp_file_name(rfile);
        let touch = Transaction::new(format!("echo \"\" > {tmp_file}").as_bytes(), self, true, Duration::from_secs(30));
        let (cmd_ok, data) = match touch.execute_locked(&self.channel, &guard).await {
            Ok(result) => result,
            Err(_) => (false, Bytes::new()),
        };
        if !cmd_ok {
            return (
                false,
                style::bold(&format!(
                    "can't upload {}: {}",
                    style::red(rfile),
                    String::from_utf8_lossy(&data)
                )),
            );
        }
        let mut cmd_ok = true;
        for (index, chunk) in chunks.iter().enumerate() {
            let redirect = if index == 0 { ">" } else { ">>" };
            let write = Transaction::new(
                format!("echo {chunk} {redirect} {tmp_file}").as_bytes(),
                self,
                true,
                Duration::from_secs(30),
            );
            cmd_ok = matches!(write.execute_locked(&self.channel, &guard).await, Ok((true, _)));
            if !cmd_ok {
                break;
            }
        }
        let outcome = if cmd_ok {
            let cmd = format!(
                "powershell -c \"[System.Convert]::FromBase64String((Get-Content -Path '{tmp_file}')) | Set-Content -Path '{rfile}' -Encoding Byte\""
            );
            let decode = Transaction::new(cmd.as_bytes(), self, true, Duration::from_secs(60));
            let (decode_ok, data) = match decode.execute_locked(&self.channel, &guard).await {
                Ok(result) => result,
                Err(_) => (false, Bytes::new()),
            };
            if decode_ok {
                (true, String::new())
            } else {
                (
                    false,
                    style::bold(&format!(
                        "failed to upload {}: {}",
                        style::red(rfile),
                        String::from_utf8_lossy(&data)
                    )),
                )
            }
        } else {
            (false, style::bold(&format!("failed to upload file {}", style::red(rfile))))
        };
        let cleanup = Transaction::new(format!("del {tmp_file}").as_bytes(), self, true, Duration::from_secs(10));
        let _ = cleanup.execute_locked(&self.channel, &guard).await;
        outcome
    }

    /// The source's raindrop-based `upgrade()` plants an opaque PE helper on
    /// disk to get a real PTY. This crate never bundles that binary (see
    /// module docs), but it does implement the handshake contract against an
    /// operator-supplied helper: upload it, launch it, wait for a one-shot
    /// sentinel to confirm it's alive.
    async fn upgrade(&self, helper_path: Option<&std::path::Path>) -> (bool, String) {
        let Some(helper_path) = helper_path else {
            return (
                false,
                style::bold("no pty helper supplied; pass a helper path to attempt the raindrop upgrade"),
            );
        };
        let payload = match tokio::fs::read(helper_path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                return (
                    false,
                    style::bold(&format!("failed to read pty helper at {}: {err}", helper_path.display())),
                )
            }
        };
        let remote_name = "raindrop.exe".to_string();
        let (uploaded, error) = self.upload(&remote_name, payload).await;
        if !uploaded {
            return (false, error);
        }

        self.channel.purge();
        let mut sentinel = [0u8; 8];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut sentinel);
        let sentinel = BASE64.encode(sentinel);
        let launch = format!("{remote_name} && echo {sentinel}\r\n");
        if self.channel.send(launch.as_bytes()).await.is_err() {
            return (false, style::bold("failed to launch pty helper"));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut scratch = Vec::new();
        loop {
            if std::time::Instant::now() >= deadline {
                return (false, style::bold("pty helper did not confirm launch within 10s"));
            }
            self.channel.wait_data(Duration::from_millis(200)).await;
            scratch.extend_from_slice(&self.channel.retrieve(0));
            if crate::channel::find_bytes(&scratch, sentinel.as_bytes()).is_some() {
                self.has_pty.store(true, Ordering::SeqCst);
                return (true, String::new());
            }
        }
    }

    fn build_transaction(&self, payload: &[u8], start: &[u8], end: &[u8], control: &[u8]) -> Bytes {
        let line_end: &[u8] = if self.has_pty.load(Ordering::SeqCst) { b"\r" } else { b"\r\n" };
        let mut out = Vec::with_capacity(payload.len() + start.len() + end.len() + control.len() + 16);
        out.extend_from_slice(b"echo ");
        out.extend_from_slice(start);
        out.extend_from_slice(b" & (");
        out.extend_from_slice(payload);
        out.extend_from_slice(b" && echo ");
        out.extend_from_slice(control);
        out.extend_from_slice(b") & echo ");
        out.extend_from_slice(end);
        out.extend_from_slice(line_end);
        Bytes::from(out)
    }
}

fn temp_file_name(rfile: &str) -> String {
    let mut raw = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rng(), &mut raw);
    let name = BASE64.encode(raw).replace('/', "_").replace('=', "0") + ".tmp";
    match std::path::Path::new(rfile).parent().and_then(|p| p.to_str()).filter(|p| !p.is_empty()) {
        Some(parent) => format!("{parent}/{name}"),
        None => name,
    }
}

fn clean(data: &[u8]) -> String {
    String::from_utf8_lossy(data).replace(['\r', '\n'], "").trim().to_string()
}

fn strip_whitespace(data: &[u8]) -> Vec<u8> {
    data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect()
}
