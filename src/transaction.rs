//! One framed round-trip: send a shell payload wrapped in start/end/control
//! markers, wait for both markers to come back, and lift the command's own
//! success/failure out of the returned bytes.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use rand::RngCore;

use crate::channel::{find_bytes, Channel, TransactionGuard};
use crate::error::ProtocolError;
use crate::platform::Platform;

fn random_token() -> Vec<u8> {
    let mut raw = [0u8; 8];
    rand::rng().fill_bytes(&mut raw);
    BASE64.encode(raw).into_bytes()
}

/// Remove every occurrence of `needle` from `data` (the control token is
/// stripped from command output before the caller ever sees it).
/// Strip ANSI escape sequences (CSI `ESC [ ... final-byte`, OSC `ESC ] ...
/// BEL/ST`, and bare two-byte escapes) from recovered command output. The
/// source occasionally saw a transaction's first result corrupted by escape
/// noise and worked around it by retrying blindly; this is the explicit,
/// testable alternative the distilled spec calls for instead.
pub fn strip_ansi(data: &[u8]) -> Bytes {
    const ESC: u8 = 0x1b;
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] != ESC {
            out.push(data[i]);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(b'[') => {
                let mut j = i + 2;
                while j < data.len() && !(0x40..=0x7e).contains(&data[j]) {
                    j += 1;
                }
                i = (j + 1).min(data.len());
            }
            Some(b']') => {
                let mut j = i + 2;
                while j < data.len() && data[j] != 0x07 && !(data[j] == ESC && data.get(j + 1) == Some(&b'\\')) {
                    j += 1;
                }
                i = if j < data.len() && data[j] == 0x07 { j + 1 } else { (j + 2).min(data.len()) };
            }
            Some(_) => i += 2,
            None => i += 1,
        }
    }
    Bytes::from(out)
}

fn remove_all(data: &[u8], needle: &[u8]) -> Bytes {
    if needle.is_empty() {
        return Bytes::copy_from_slice(data);
    }
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(idx) = find_bytes(rest, needle) {
        out.extend_from_slice(&rest[..idx]);
        rest = &rest[idx + needle.len()..];
    }
    out.extend_from_slice(rest);
    Bytes::from(out)
}

pub struct Transaction {
    start: Vec<u8>,
    end: Vec<u8>,
    control: Vec<u8>,
    buffer: Bytes,
    handle_echo: bool,
    timeout: Duration,
}

impl Transaction {
    pub fn new(payload: &[u8], platform: &dyn Platform, handle_echo: bool, timeout: Duration) -> Self {
        let start = random_token();
        let end = random_token();
        let control = random_token();
        let buffer = platform.build_transaction(payload, &start, &end, &control);
        Transaction {
            start,
            end,
            control,
            buffer,
            handle_echo,
            timeout,
        }
    }

    /// `(cmd_ok, data)`. `cmd_ok` is true only when the control token made it
    /// back, i.e. the wrapped command itself exited successfully (`&&`).
    pub async fn execute(&self, platform: &dyn Platform) -> Result<(bool, Bytes), ProtocolError> {
        let raw = platform
            .exec_transaction(&self.buffer, &self.start, &self.end, self.handle_echo, self.timeout)
            .await?;
        Ok(self.finish(raw))
    }

    /// Same as `execute`, but collapses protocol failure into the triple the
    /// command-facing surfaces (`whoami`, `download`, ...) report: transport
    /// failure and command failure both just mean "nothing usable came back".
    pub async fn execute_triple(&self, platform: &dyn Platform) -> (bool, bool, Bytes) {
        match self.execute(platform).await {
            Ok((cmd_ok, data)) => (true, cmd_ok, data),
            Err(_) => (false, false, Bytes::new()),
        }
    }

    /// Run under a transaction lock the caller already holds, bypassing
    /// [`Platform::exec_transaction`]'s own acquire — needed by `download`/
    /// `upload`, which chain several transactions under one held guard so
    /// the central reader can't steal bytes between steps.
    pub async fn execute_locked(
        &self,
        channel: &Channel,
        guard: &TransactionGuard<'_>,
    ) -> Result<(bool, Bytes), ProtocolError> {
        let raw = channel
            .exec_transaction(guard, &self.buffer, &self.start, &self.end, self.handle_echo, self.timeout)
            .await?;
        Ok(self.finish(raw))
    }

    fn finish(&self, raw: Bytes) -> (bool, Bytes) {
        let cmd_ok = find_bytes(&raw, &self.control).is_some();
        let data = if cmd_ok { remove_all(&raw, &self.control) } else { raw };
        (cmd_ok, strip_ansi(&data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_all_strips_every_occurrence() {
        let data = b"abcXYZdefXYZghi";
        let out = remove_all(data, b"XYZ");
        assert_eq!(&out[..], b"abcdefghi");
    }

    #[test]
    fn remove_all_is_noop_without_match() {
        let data = b"nothing to see here";
        let out = remove_all(data, b"XYZ");
        assert_eq!(&out[..], &data[..]);
    }

    #[test]
    fn random_token_is_base64_and_nonempty() {
        let token = random_token();
        assert!(!token.is_empty());
        assert!(token.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/' || *b == b'='));
    }

    #[test]
    fn strip_ansi_removes_csi_color_codes() {
        let data = b"\x1b[31mred\x1b[0m plain";
        assert_eq!(&strip_ansi(data)[..], b"red plain");
    }

    #[test]
    fn strip_ansi_removes_osc_title_sequence() {
        let data = b"before\x1b]0;window title\x07after";
        assert_eq!(&strip_ansi(data)[..], b"beforeafter");
    }

    #[test]
    fn strip_ansi_is_noop_on_plain_text() {
        let data = b"nothing escaped here";
        assert_eq!(&strip_ansi(data)[..], &data[..]);
    }
}
