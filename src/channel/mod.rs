//! Channel: one live byte-stream peer, with a central-reader-fed queue and
//! the transaction executor used to run framed commands against it.

pub mod lock;
pub mod register;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::watch;

use crate::config::Config;
use crate::error::{ProtocolError, TransportError};
use crate::transport::{ChannelProtocol, Transport};

pub use lock::{TransactionGuard, TransactionLock};

/// Lifecycle state. Monotone except into the terminal `Error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
    Error,
}

/// Invoked when the central reader (or a transaction) observes a transport
/// failure. Takes the place of the source's weak `error_callback` — the
/// Manager uses it to enqueue the owning session id into its broken-session
/// queue without Channel needing to know what a Session is.
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

pub struct Channel {
    transport: Box<dyn Transport>,
    state: Mutex<ChannelState>,
    queue: Mutex<VecDeque<Bytes>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    has_data_tx: watch::Sender<bool>,
    has_data_rx: watch::Receiver<bool>,
    transaction_lock: TransactionLock,
    error_callback: Mutex<Option<ErrorCallback>>,
    config: Config,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("remote", &self.transport.remote())
            .field("protocol", &self.transport.protocol().as_str())
            .field("state", &*self.state.lock().expect("state lock poisoned"))
            .finish()
    }
}

impl Channel {
    pub fn new(transport: Box<dyn Transport>, config: Config) -> Arc<Self> {
        let (ready_tx, ready_rx) = watch::channel(false);
        let (has_data_tx, has_data_rx) = watch::channel(false);
        Arc::new(Channel {
            transport,
            state: Mutex::new(ChannelState::Closed),
            queue: Mutex::new(VecDeque::new()),
            ready_tx,
            ready_rx,
            has_data_tx,
            has_data_rx,
            transaction_lock: TransactionLock::default(),
            error_callback: Mutex::new(None),
            config,
        })
    }

    pub fn set_error_callback(&self, cb: ErrorCallback) {
        *self.error_callback.lock().expect("error_callback lock poisoned") = Some(cb);
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn remote(&self) -> String {
        self.transport.remote()
    }

    pub fn protocol(&self) -> ChannelProtocol {
        self.transport.protocol()
    }

    pub fn transaction_lock(&self) -> &TransactionLock {
        &self.transaction_lock
    }

    /// Drive CLOSED → OPENING → OPEN. The transport is already connected
    /// (the protocol-specific `connect`/accept logic runs before a `Channel`
    /// is constructed); this is the generic bookkeeping the source's
    /// `on_open` hook performs once that's done: register with the central
    /// reader, raise the ready signal, log the new peer.
    pub async fn open(self: &Arc<Self>) -> Result<(), TransportError> {
        *self.state.lock().expect("state lock poisoned") = ChannelState::Opening;
        *self.state.lock().expect("state lock poisoned") = ChannelState::Open;
        register::register(Arc::clone(self), self.config.clone());
        let _ = self.ready_tx.send(true);
        log::info!("connected to remote {}", self.remote());
        Ok(())
    }

    /// Idempotent: a second call is a no-op, not an error.
    pub async fn close(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == ChannelState::Closed {
                return;
            }
            *state = ChannelState::Closing;
        }
        register::unregister(self);
        self.transport.close().await;
        *self.state.lock().expect("state lock poisoned") = ChannelState::Closed;
    }

    pub async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.transport.send(data).await
    }

    /// Dequeue up to `n` items (0 = all), FIFO order. Clears the has-data
    /// signal once the queue empties.
    pub fn retrieve(&self, n: usize) -> Bytes {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        let mut out = BytesMut::new();
        if n == 0 {
            while let Some(chunk) = queue.pop_front() {
                out.extend_from_slice(&chunk);
            }
        } else {
            for _ in 0..n {
                match queue.pop_front() {
                    Some(chunk) => out.extend_from_slice(&chunk),
                    None => break,
                }
            }
        }
        if queue.is_empty() {
            let _ = self.has_data_tx.send(false);
        }
        out.freeze()
    }

    pub fn purge(&self) {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        queue.clear();
        let _ = self.has_data_tx.send(false);
    }

    fn collect(&self, data: Bytes) {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        queue.push_back(data);
        let _ = self.has_data_tx.send(true);
    }

    pub async fn wait_open(&self, timeout: Duration) -> bool {
        wait_level(&self.ready_rx, timeout).await
    }

    pub async fn wait_data(&self, timeout: Duration) -> bool {
        wait_level(&self.has_data_rx, timeout).await
    }

    /// Transition to ERROR exactly once and notify the owner (Manager).
    /// Per the design's resolved open question, the channel itself does not
    /// call `close` here — transport teardown happens exactly once, later,
    /// when the reaper calls `kill`.
    fn fail(&self, err: impl std::fmt::Display) {
        let should_report = {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == ChannelState::Error {
                false
            } else {
                *state = ChannelState::Error;
                true
            }
        };
        if should_report {
            let message = err.to_string();
            log::warn!("channel {} error: {message}", self.remote());
            let callback = self.error_callback.lock().expect("error_callback lock poisoned").clone();
            if let Some(callback) = callback {
                callback(message);
            }
        }
    }

    /// One poll round for the central reader: try to take the transaction
    /// lock without blocking (a transaction in flight means skip this
    /// round), then recv and collect.
    pub(crate) async fn reader_tick(&self, poll_cap: Duration) {
        if !self.is_open() {
            return;
        }
        let _guard = match self.transaction_lock.try_acquire() {
            Some(guard) => guard,
            None => return,
        };
        match self.transport.recv(poll_cap).await {
            Ok(data) if data.is_empty() => {}
            Ok(data) => self.collect(data),
            Err(err) => self.fail(err),
        }
    }

    /// Run one framed transaction under an already-held transaction lock.
    /// Returns the raw bytes strictly between `start` and `end` once both
    /// have been observed, or `ProtocolError::Timeout` if either phase
    /// exceeds `timeout` — at which point the channel is transitioned to
    /// ERROR, matching the source's "a stuck transaction means the peer is
    /// gone" rationale.
    pub async fn exec_transaction(
        &self,
        _guard: &TransactionGuard<'_>,
        framed: &[u8],
        start: &[u8],
        end: &[u8],
        handle_echo: bool,
        timeout: Duration,
    ) -> Result<Bytes, ProtocolError> {
        self.send(framed).await?;
        let mut scratch = BytesMut::new();

        if handle_echo {
            let echo_deadline = Instant::now() + timeout;
            loop {
                if find_bytes(&scratch, end).is_some() {
                    break;
                }
                if Instant::now() >= echo_deadline {
                    self.fail("channel's transaction timeout");
                    return Err(ProtocolError::Timeout);
                }
                let chunk = self.transport.recv(self.config.recv_poll_cap).await?;
                scratch.extend_from_slice(&chunk);
            }
            let cut = find_bytes(&scratch, end).expect("checked above") + end.len();
            scratch = BytesMut::from(&scratch[cut..]);
        }

        let await_deadline = Instant::now() + timeout;
        loop {
            if find_bytes(&scratch, start).is_some() {
                break;
            }
            if Instant::now() >= await_deadline {
                self.fail("channel's transaction timeout");
                return Err(ProtocolError::Timeout);
            }
            let chunk = self.transport.recv(self.config.recv_poll_cap).await?;
            scratch.extend_from_slice(&chunk);
        }
        loop {
            if find_bytes(&scratch, end).is_some() {
                break;
            }
            if Instant::now() >= await_deadline {
                self.fail("channel's transaction timeout");
                return Err(ProtocolError::Timeout);
            }
            let chunk = self.transport.recv(self.config.recv_poll_cap).await?;
            scratch.extend_from_slice(&chunk);
        }

        // Drain-tail: read until one poll interval yields nothing, so
        // residue can't pollute the next transaction.
        loop {
            let chunk = self.transport.recv(self.config.recv_poll_cap).await?;
            if chunk.is_empty() {
                break;
            }
            scratch.extend_from_slice(&chunk);
        }

        Ok(extract_between(&scratch, start, end))
    }
}

async fn wait_level(rx: &watch::Receiver<bool>, timeout: Duration) -> bool {
    if *rx.borrow() {
        return true;
    }
    let mut rx = rx.clone();
    tokio::time::timeout(timeout, async {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .is_ok()
}

/// Left-to-right substring search, matching the search order invariant (§5).
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Bytes strictly between the first `start` and the following `end`.
pub fn extract_between(raw: &[u8], start: &[u8], end: &[u8]) -> Bytes {
    let Some(start_idx) = find_bytes(raw, start) else {
        return Bytes::new();
    };
    let after_start = start_idx + start.len();
    match find_bytes(&raw[after_start..], end) {
        Some(rel_end_idx) => Bytes::copy_from_slice(&raw[after_start..after_start + rel_end_idx]),
        None => Bytes::new(),
    }
}
