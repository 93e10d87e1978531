//! POSIX shell adapter: `sh`-family framing, a PTY obtained via `script` or
//! Python's `pty.spawn`, and base64-over-`echo` file transfer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use crate::channel::Channel;
use crate::config::POSIX_UPLOAD_CHUNK;
use crate::platform::{Platform, PlatformKind};
use crate::style;
use crate::transaction::Transaction;

const PTY_BINARIES: &[(&[&str], &str)] = &[
    (&["script"], "{bin} -qc {shell} /dev/null 2>&1\n"),
    (
        &[
            "python", "python2", "python2.7", "python3", "python3.6", "python3.8", "python3.9",
            "python3.10", "python3.11",
        ],
        "{bin} -c \"import pty; pty.spawn('{shell}')\" 2>&1",
    ),
];

const BETTER_SHELLS: &[&str] = &["zsh", "bash", "ksh", "fish", "dash"];

pub struct LinuxPlatform {
    channel: Arc<Channel>,
    has_pty: AtomicBool,
    interactive: AtomicBool,
}

impl LinuxPlatform {
    pub fn new(channel: Arc<Channel>) -> Self {
        LinuxPlatform {
            channel,
            has_pty: AtomicBool::new(false),
            interactive: AtomicBool::new(false),
        }
    }

    async fn disable_history(&self) {
        let _ = self
            .send_cmd(
                "set +o history;unset HISTFILE;export HISTCONTROL=ignorespace;unset PROMPT_COMMAND",
                Duration::from_millis(50),
            )
            .await;
    }

    async fn disable_echo(&self) {
        let _ = self.send_cmd("stty -echo", Duration::from_millis(50)).await;
    }

    /// Try each candidate pty-spawning binary in turn; stop at the first one
    /// the remote actually has.
    async fn get_pty(&self) -> bool {
        self.disable_history().await;
        self.disable_echo().await;
        let mut got_pty = false;
        'outer: for (binaries, payload_format) in PTY_BINARIES {
            for binary in *binaries {
                let (_, cmd_ok, resp) = self.which(binary).await;
                if cmd_ok && resp.contains(binary) {
                    let payload = payload_format.replace("{bin}", binary).replace("{shell}", "sh");
                    let _ = self.send_cmd(&payload, Duration::from_millis(200)).await;
                    self.disable_history().await;
                    self.disable_echo().await;
                    got_pty = true;
                    break 'outer;
                }
            }
        }
        if got_pty {
            self.has_pty.store(true, Ordering::SeqCst);
        }
        self.channel.wait_data(Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.channel.purge();
        got_pty
    }
}

#[async_trait]
impl Platform for LinuxPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Linux
    }

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn is_interactive(&self) -> bool {
        self.interactive.load(Ordering::SeqCst)
    }

    async fn interactive(&self, value: bool, session_label: &str) -> bool {
        if value == self.is_interactive() {
            return true;
        }
        let mut res = false;
        if value {
            let _ = crossterm::terminal::enable_raw_mode();
            // Disarmed once the pty negotiation actually lands; if anything
            // below bails out partway, dropping this puts the local terminal
            // back the way we found it.
            let raw_mode_guard = scopeguard::guard((), |()| {
                let _ = crossterm::terminal::disable_raw_mode();
            });
            self.disable_history().await;
            self.disable_echo().await;
            let term = std::env::var("TERM").unwrap_or_else(|_| "xterm".to_string());
            let (columns, rows) = crossterm::terminal::size().unwrap_or((80, 24));
            let payload = format!(" stty sane ; stty rows {rows} columns {columns} ; export TERM='{term}'");
            let _ = self.send_cmd(&payload, Duration::from_millis(50)).await;

            if self.has_pty.load(Ordering::SeqCst) {
                // Already have a pty but were backgrounded: leave the `sh`
                // shell the earlier pty-upgrade spawned us into.
                res = self.send_cmd("exit", Duration::from_millis(50)).await.is_ok();
            } else if self.get_pty().await {
                let mut best_shell = "sh".to_string();
                for shell in BETTER_SHELLS {
                    let (_, cmd_ok, resp) = self.which(shell).await;
                    if cmd_ok && resp.contains(shell) {
                        best_shell = shell.to_string();
                        break;
                    }
                }
                res = self.send_cmd(&best_shell, Duration::from_millis(100)).await.is_ok();
                self.disable_history().await;
                let prompt = prompt_for(&best_shell, session_label);
                let transaction = Transaction::new(
                    format!("export PS1={prompt}").as_bytes(),
                    self,
                    false,
                    Duration::from_secs(5),
                );
                let _ = transaction.execute(self).await;
            }
            if res {
                self.channel.wait_data(Duration::from_secs(1)).await;
                tokio::time::sleep(Duration::from_millis(500)).await;
                self.channel.purge();
                res = self.send_cmd("", Duration::from_millis(50)).await.is_ok();
            }
            if res {
                self.interactive.store(true, Ordering::SeqCst);
                scopeguard::ScopeGuard::into_inner(raw_mode_guard);
            }
        } else {
            // ETX cancels whatever the operator was mid-typing.
            let _ = self.send_cmd("\x03", Duration::from_millis(50)).await;
            if self.is_interactive() {
                let _ = crossterm::terminal::disable_raw_mode();
            }
            if self.channel.is_open() {
                let _ = self.send_cmd("sh", Duration::from_millis(100)).await;
                self.disable_history().await;
                self.disable_echo().await;
                let _ = self.send_cmd("unset PS1", Duration::from_millis(50)).await;
                self.channel.wait_data(Duration::from_secs(1)).await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.channel.purge();
            }
            self.interactive.store(false, Ordering::SeqCst);
            res = true;
        }
        res
    }

    async fn which(&self, name: &str) -> (bool, bool, String) {
        self.channel.purge();
        let transaction = Transaction::new(format!("which {name}").as_bytes(), self, false, Duration::from_secs(30));
        let (ok, cmd_ok, data) = transaction.execute_triple(self).await;
        (ok, cmd_ok, String::from_utf8_lossy(&data).into_owned())
    }

    async fn hostname(&self) -> (bool, bool, String) {
        self.channel.purge();
        let transaction = Transaction::new(b"hostname", self, false, Duration::from_secs(30));
        let (ok, cmd_ok, data) = transaction.execute_triple(self).await;
        let text = if cmd_ok { text_lines(&data) } else { String::new() };
        (ok, cmd_ok, text)
    }

    async fn whoami(&self) -> (bool, bool, String) {
        self.channel.purge();
        let transaction = Transaction::new(b"whoami", self, false, Duration::from_secs(30));
        let (ok, cmd_ok, data) = transaction.execute_triple(self).await;
        let text = if cmd_ok { text_lines(&data) } else { String::new() };
        (ok, cmd_ok, text)
    }

    async fn download(&self, rfile: &str) -> (bool, String, Bytes) {
        self.channel.purge();
        let guard = self.channel.transaction_lock().acquire().await;
        let probe = Transaction::new(
            format!("head -1 {rfile} > /dev/null").as_bytes(),
            self,
            false,
            Duration::from_secs(30),
        );
        let (probe_cmd_ok, probe_data) = match probe.execute_locked(&self.channel, &guard).await {
            Ok(result) => result,
            Err(_) => (false, Bytes::new()),
        };
        if !probe_cmd_ok {
            let message = style::bold(&format!(
                "can't download {}: {}",
                style::red(rfile),
                String::from_utf8_lossy(&probe_data)
            ));
            return (false, message, Bytes::new());
        }
        let body = Transaction::new(format!("base64 {rfile}").as_bytes(), self, false, Duration::from_secs(60));
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
        let chunks: Vec<&str> = encoded.as_bytes().chunks(POSIX_UPLOAD_CHUNK).map(|c| std::str::from_utf8(c).expect("base64 is ascii")).collect();
        let guard = self.channel.transaction_lock().acquire().await;
        let tmp_file = temp_file_name(rfile);
        let touch = Transaction::new(format!("touch {tmp_file}").as_bytes(), self, false, Duration::from_secs(30));
        let (_, cmd_ok, data) = match touch.execute_locked(&self.channel, &guard).await {
            Ok((ok, data)) => (true, ok, data),
            Err(_) => (false, false, Bytes::new()),
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
                false,
                Duration::from_secs(30),
            );
            cmd_ok = matches!(write.execute_locked(&self.channel, &guard).await, Ok((true, _)));
            if !cmd_ok {
                break;
            }
        }
        if cmd_ok {
            let quoted = shlex::quote(rfile).into_owned();
            let decode = Transaction::new(
                format!("base64 -d {tmp_file} > {quoted}").as_bytes(),
                self,
                false,
                Duration::from_secs(60),
            );
            let (ok, decode_ok, data) = match decode.execute_locked(&self.channel, &guard).await {
                Ok((ok, data)) => (true, ok, data),
                Err(_) => (false, false, Bytes::new()),
            };
            let cleanup = Transaction::new(format!("rm {tmp_file}").as_bytes(), self, false, Duration::from_secs(10));
            let _ = cleanup.execute_locked(&self.channel, &guard).await;
            if ok && decode_ok {
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
        }
    }

    fn build_transaction(&self, payload: &[u8], start: &[u8], end: &[u8], control: &[u8]) -> Bytes {
        let mut out = Vec::with_capacity(payload.len() + start.len() + end.len() + control.len() + 16);
        out.extend_from_slice(b"echo ");
        out.extend_from_slice(start);
        out.extend_from_slice(b";");
        out.extend_from_slice(payload);
        out.extend_from_slice(b" && echo ");
        out.extend_from_slice(control);
        out.extend_from_slice(b"; echo ");
        out.extend_from_slice(end);
        out.extend_from_slice(b"\n");
        Bytes::from(out)
    }
}

fn temp_file_name(rfile: &str) -> String {
    let mut raw = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rng(), &mut raw);
    let name = BASE64.encode(raw).replace('/', "_") + ".tmp";
    match std::path::Path::new(rfile).parent().and_then(|p| p.to_str()).filter(|p| !p.is_empty()) {
        Some(parent) => format!("{parent}/{name}"),
        None => name,
    }
}

fn text_lines(data: &[u8]) -> String {
    String::from_utf8_lossy(data).replace(['\r', '\n'], "")
}

fn strip_whitespace(data: &[u8]) -> Vec<u8> {
    data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect()
}

fn prompt_for(shell: &str, session_label: &str) -> String {
    let body = match shell {
        "sh" | "dash" => r#"'$(command printf "[remote] $(whoami)@$(hostname):$PWD\$ ")'"#.to_string(),
        "zsh" => {
            r"%B%F{red}[remote] %B%F{yellow}%n@%M%B%F{reset}:%B%F{cyan}%~%B%(#.%b%F{white}#.%b%F{white}$)%b%F{reset} "
                .to_string()
        }
        "bash" => r#"'$(command printf "\[\033[01;31m\][remote] \[\033[0m\]\[\033[01;33m\]$(whoami)@$(hostname)\[\033[0m\]:\[\033[1;36m\]\w\[\033[0m\]\$ ")'"#.to_string(),
        // ksh/fish and anything else `which` turned up get the same colored
        // prompt bash gets, keyed off $PWD instead of bash's \w escape.
        _ => r#"'$(command printf "\[\033[01;31m\][remote] \[\033[0m\]\[\033[01;33m\]$(whoami)@$(hostname)\[\033[0m\]:\[\033[1;36m\]$PWD\[\033[0m\]\$ ")'"#.to_string(),
    };
    body.replacen("remote", &format!("session {session_label}"), 1)
}
