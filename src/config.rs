//! Operational knobs.
//!
//! Nothing here is persisted to disk (Non-goal: no persistence). Defaults
//! match the original tool; every field can be overridden by an environment
//! variable for scripted/CI use, and the CLI surface may override further.

use std::env;
use std::time::Duration;

/// POSIX upload chunk size: ash/dash severely limit command-line length.
pub const POSIX_UPLOAD_CHUNK: usize = 2048;
/// Windows upload chunk size: cmd.exe tolerates longer lines.
pub const WINDOWS_UPLOAD_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
pub struct Config {
    /// Default deadline for a single transaction (§4.3).
    pub transaction_timeout: Duration,
    /// Deadline for the POSIX/Windows PTY-upgrade handshake (§4.4.1).
    pub pty_upgrade_timeout: Duration,
    /// Central reader poll interval (§4.2).
    pub reader_poll_interval: Duration,
    /// Transport-level recv readiness cap (§4.1).
    pub recv_poll_cap: Duration,
    /// Reader task idle sleep between `retrieve()` calls (§4.5).
    pub reader_idle_sleep: Duration,
    /// Reaper poll interval (§4.7).
    pub reaper_poll_interval: Duration,
    /// `wait_open` deadline used by the background-listener accept path.
    pub open_wait_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            transaction_timeout: Duration::from_secs(30),
            pty_upgrade_timeout: Duration::from_secs(10),
            reader_poll_interval: Duration::from_millis(10),
            recv_poll_cap: Duration::from_millis(50),
            reader_idle_sleep: Duration::from_millis(1),
            reaper_poll_interval: Duration::from_millis(10),
            open_wait_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Build the default config, applying environment overrides.
    ///
    /// `REDCAT_TRANSACTION_TIMEOUT_SECS` and `REDCAT_PTY_UPGRADE_TIMEOUT_SECS`
    /// are the two knobs an operator plausibly wants to tweak per engagement
    /// (a laggy VPN link needs a longer transaction deadline).
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Some(secs) = env_u64("REDCAT_TRANSACTION_TIMEOUT_SECS") {
            cfg.transaction_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("REDCAT_PTY_UPGRADE_TIMEOUT_SECS") {
            cfg.pty_upgrade_timeout = Duration::from_secs(secs);
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
