//! Error taxonomy for the channel/transaction/platform stack.
//!
//! Outer call sites (the CLI/REPL) collapse everything down to its
//! `Display` string for printing; inner layers keep a typed enum so callers
//! can match on the kind of failure (a timed-out transaction is handled
//! differently than a broken socket, even though both end up tearing the
//! channel down).

use std::io;

/// Failures from the byte transport (socket / TLS) layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),

    #[error("connection with remote {0} broken")]
    PeerClosed(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("channel is not open")]
    NotOpen,
}

/// Failures from the transaction protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("channel's transaction timeout")]
    Timeout,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Local filesystem failures surfaced by upload/download.
#[derive(Debug, thiserror::Error)]
pub enum LocalIoError {
    #[error("local file {0} not found")]
    NotFound(String),

    #[error("local {0} is a directory")]
    IsADirectory(String),

    #[error("don't have permission to access local file {0}")]
    PermissionDenied(String),

    #[error("cannot write local file {0}: parent directory not found")]
    ParentMissing(String),

    #[error("local io error on {path}: {source}")]
    Other {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl LocalIoError {
    /// Map a raw `io::Error` encountered while reading/writing `path` to the
    /// structured taxonomy the manager reports to the operator.
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => LocalIoError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => LocalIoError::PermissionDenied(path.to_string()),
            io::ErrorKind::IsADirectory => LocalIoError::IsADirectory(path.to_string()),
            _ => LocalIoError::Other {
                path: path.to_string(),
                source: err,
            },
        }
    }
}

/// Errors surfaced at the command surface: unknown command, unknown id,
/// invalid option combination. Never escalated past the REPL.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("unknown session id {0}")]
    UnknownSession(String),

    #[error("unknown listener id {0}")]
    UnknownListener(String),

    #[error("no session selected for the {0} operation")]
    NoSessionSelected(String),

    #[error("invalid parameter {0}")]
    InvalidParameter(String),
}

/// File-transfer failure, keeping the transport-level/command-level/local-io
/// dimensions distinct the way `download`/`upload` need to report them.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Remote(String),

    #[error(transparent)]
    Local(#[from] LocalIoError),
}
