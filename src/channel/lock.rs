//! The transaction lock.
//!
//! The central reader must never consume bytes while a transaction is in
//! flight, and some platform operations (Windows upload, POSIX PTY upgrade)
//! need to run several transactions back to back without letting the reader
//! sneak in between them. `tokio::sync::Mutex` isn't reentrant, so instead
//! of detecting "is this the same logical owner" we thread an explicit
//! guard — the "lock token" mapping from the design notes: whoever already
//! holds the guard passes `&guard` down to nested calls instead of
//! acquiring a second time.

use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct TransactionLock(Mutex<()>);

impl TransactionLock {
    /// Block until the lock is free, then hold it for the guard's lifetime.
    pub async fn acquire(&self) -> TransactionGuard<'_> {
        TransactionGuard(self.0.lock().await)
    }

    /// Non-blocking variant for the central reader: `None` means a
    /// transaction currently owns the lock, so this poll round is skipped.
    pub fn try_acquire(&self) -> Option<TransactionGuard<'_>> {
        self.0.try_lock().ok().map(TransactionGuard)
    }
}

#[derive(Debug)]
pub struct TransactionGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);
