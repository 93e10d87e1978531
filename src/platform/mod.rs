//! Platform adapters: the shell-specific knowledge layered on top of a raw
//! [`Channel`] — how to frame a transaction, how to get a PTY, how to move a
//! file in and out.

pub mod linux;
pub mod windows;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::channel::Channel;
use crate::error::{ProtocolError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Linux,
    Windows,
}

impl PlatformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformKind::Linux => "linux",
            PlatformKind::Windows => "windows",
        }
    }
}

impl std::str::FromStr for PlatformKind {
    type Err = crate::error::UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(PlatformKind::Linux),
            "windows" => Ok(PlatformKind::Windows),
            other => Err(crate::error::UsageError::InvalidParameter(other.to_string())),
        }
    }
}

/// Shell-specific behavior layered over a channel. One instance per session,
/// holding whatever little state the interactive state machine needs
/// (currently-has-a-pty, raw-mode-entered, ...).
#[async_trait]
pub trait Platform: Send + Sync {
    fn kind(&self) -> PlatformKind;

    fn channel(&self) -> &Arc<Channel>;

    fn is_interactive(&self) -> bool;

    /// Flip interactive mode, taking/releasing the local terminal's raw mode
    /// and running whatever remote shell setup that requires.
    async fn interactive(&self, value: bool, session_label: &str) -> bool;

    async fn which(&self, _name: &str) -> (bool, bool, String) {
        (false, false, format!("which not implemented for {} platform", self.kind().as_str()))
    }

    async fn hostname(&self) -> (bool, bool, String) {
        (false, false, format!("hostname not implemented for {} platform", self.kind().as_str()))
    }

    async fn whoami(&self) -> (bool, bool, String) {
        (false, false, format!("whoami not implemented for {} platform", self.kind().as_str()))
    }

    async fn download(&self, _rfile: &str) -> (bool, String, Bytes) {
        (false, format!("download not implemented for {} platform", self.kind().as_str()), Bytes::new())
    }

    async fn upload(&self, _rfile: &str, _data: Bytes) -> (bool, String) {
        (false, format!("upload not implemented for {} platform", self.kind().as_str()))
    }

    /// Out-of-band shell upgrade (Windows' raindrop helper, uploaded from
    /// `helper_path` if the operator supplied one). Most platforms have
    /// nothing to upgrade to once they already have a PTY.
    async fn upgrade(&self, _helper_path: Option<&std::path::Path>) -> (bool, String) {
        (false, format!("upgrade not implemented for {} platform", self.kind().as_str()))
    }

    /// Frame `payload` between `start`/`end`/`control` markers. The default
    /// is the POSIX framing; Windows overrides it for `cmd.exe`.
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

    /// Default just delegates to the channel under a freshly-acquired
    /// transaction lock; overriding is only needed if a platform wants to
    /// wrap several transactions under one held lock (see `download`/`upload`).
    async fn exec_transaction(
        &self,
        buffer: &[u8],
        start: &[u8],
        end: &[u8],
        handle_echo: bool,
        timeout: Duration,
    ) -> Result<Bytes, ProtocolError> {
        let guard = self.channel().transaction_lock().acquire().await;
        self.channel().exec_transaction(&guard, buffer, start, end, handle_echo, timeout).await
    }

    async fn send_cmd(&self, cmd: &str, wait_for: Duration) -> Result<(), TransportError> {
        self.channel().send(format!("{cmd}\r\n").as_bytes()).await?;
        tokio::time::sleep(wait_for).await;
        Ok(())
    }
}

pub fn build(kind: PlatformKind, channel: Arc<Channel>) -> Box<dyn Platform> {
    match kind {
        PlatformKind::Linux => Box::new(linux::LinuxPlatform::new(channel)),
        PlatformKind::Windows => Box::new(windows::WindowsPlatform::new(channel)),
    }
}
