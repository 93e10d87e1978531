//! Process-wide singleton owning the central reader.
//!
//! One task polls readiness across every open channel and drains whichever
//! ones are readable. The set is empty-to-start; registering the first
//! channel spawns the task, and the task exits once the set drains back to
//! empty, to be respawned by the next registration.

use std::sync::{Arc, Mutex, OnceLock};

use tokio::task::JoinHandle;

use super::Channel;
use crate::config::Config;

struct RegistryState {
    channels: Vec<std::sync::Weak<Channel>>,
    worker: Option<JoinHandle<()>>,
}

struct Registry {
    state: Mutex<RegistryState>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        state: Mutex::new(RegistryState {
            channels: Vec::new(),
            worker: None,
        }),
    })
}

/// Register a channel and ensure the reader task is running.
///
/// The channel-list push and the worker-spawn decision happen under one
/// lock acquisition, the same one `reader_loop` holds while re-checking the
/// list and clearing `worker`. That keeps the two sides from interleaving:
/// a channel can never be pushed into a list the reader has already decided
/// is empty without the reader also seeing it before it clears `worker`.
pub fn register(channel: Arc<Channel>, config: Config) {
    let reg = registry();
    let mut state = reg.state.lock().expect("registry lock poisoned");
    state.channels.push(Arc::downgrade(&channel));
    if state.worker.is_none() {
        state.worker = Some(tokio::spawn(reader_loop(config)));
    }
}

/// Remove a channel from the readiness set. Called by `Channel::close`.
pub fn unregister(channel: &Arc<Channel>) {
    let reg = registry();
    let mut state = reg.state.lock().expect("registry lock poisoned");
    state
        .channels
        .retain(|weak| !matches!(weak.upgrade(), Some(existing) if Arc::ptr_eq(&existing, channel)));
}

async fn reader_loop(config: Config) {
    loop {
        let snapshot: Vec<Arc<Channel>> = {
            let reg = registry();
            let mut state = reg.state.lock().expect("registry lock poisoned");
            state.channels.retain(|weak| weak.strong_count() > 0);
            if state.channels.is_empty() {
                state.worker = None;
                return;
            }
            state.channels.iter().filter_map(|weak| weak.upgrade()).collect()
        };
        for channel in snapshot {
            channel.reader_tick(config.recv_poll_cap).await;
        }
        tokio::time::sleep(config.reader_poll_interval).await;
    }
}
