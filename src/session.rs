//! One remote shell: a channel, the platform adapter layered over it, and
//! the reader/writer tasks that pump bytes between it and the operator's
//! terminal while `interactive` mode is on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::channel::Channel;
use crate::config::Config;
use crate::error::TransportError;
use crate::ids::SessionId;
use crate::platform::{self, Platform, PlatformKind};
use crate::transport::ChannelProtocol;

pub struct Session {
    id: SessionId,
    channel: Arc<Channel>,
    platform: Box<dyn Platform>,
    hostname: Mutex<Option<String>>,
    user: Mutex<Option<String>>,
    stop: Notify,
    stopped: AtomicBool,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    writer_task: StdMutex<Option<JoinHandle<()>>>,
    /// Serializes every `Platform::interactive` transition. An operator
    /// toggling `shell <id>` can otherwise race a reaper-triggered `close`
    /// on the same session, landing two overlapping raw-mode/PS1 sequences
    /// on the same shell.
    mode_lock: Mutex<()>,
}

impl Session {
    pub fn new(id: SessionId, channel: Arc<Channel>, platform_kind: PlatformKind) -> Arc<Self> {
        let platform = platform::build(platform_kind, Arc::clone(&channel));
        Arc::new(Session {
            id,
            channel,
            platform,
            hostname: Mutex::new(None),
            user: Mutex::new(None),
            stop: Notify::new(),
            stopped: AtomicBool::new(true),
            reader_task: StdMutex::new(None),
            writer_task: StdMutex::new(None),
            mode_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote(&self) -> String {
        self.channel.remote()
    }

    pub fn protocol(&self) -> ChannelProtocol {
        self.channel.protocol()
    }

    pub fn platform_name(&self) -> &'static str {
        self.platform.kind().as_str()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn is_interactive(&self) -> bool {
        self.platform.is_interactive()
    }

    /// Cached the same way the source's `hostname`/`user` properties do —
    /// resolved once on first access while the channel is open, never
    /// invalidated (a shell rarely renames its own host mid-session).
    pub async fn hostname(&self) -> String {
        if !self.channel.is_open() {
            return String::new();
        }
        let mut cached = self.hostname.lock().await;
        if cached.is_none() {
            let (_, _, value) = self.platform.hostname().await;
            *cached = Some(value);
        }
        cached.clone().unwrap_or_default()
    }

    pub async fn user(&self) -> String {
        if !self.channel.is_open() {
            return String::new();
        }
        let mut cached = self.user.lock().await;
        if cached.is_none() {
            let (_, _, value) = self.platform.whoami().await;
            *cached = Some(value);
        }
        cached.clone().unwrap_or_default()
    }

    pub async fn open(self: &Arc<Self>) -> Result<(), TransportError> {
        self.channel.open().await
    }

    pub async fn wait_open(&self, timeout: Duration) -> bool {
        self.channel.wait_open(timeout).await
    }

    pub async fn close(self: &Arc<Self>) {
        self.channel.close().await;
        {
            let _mode_guard = self.mode_lock.lock().await;
            self.platform.interactive(false, &self.id.to_string()).await;
        }
        self.stop();
        self.join().await;
    }

    pub async fn interactive(self: &Arc<Self>, value: bool, session_label: &str) -> bool {
        let _mode_guard = self.mode_lock.lock().await;
        if self.is_interactive() == value {
            return self.is_interactive();
        }
        self.platform.interactive(value, session_label).await
    }

    pub async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.channel.send(data).await
    }

    pub async fn download(&self, rfile: &str) -> (bool, String, Bytes) {
        self.platform.download(rfile).await
    }

    pub async fn upload(&self, rfile: &str, data: Bytes) -> (bool, String) {
        self.platform.upload(rfile, data).await
    }

    pub async fn upgrade(&self, helper_path: Option<&std::path::Path>) -> (bool, String) {
        self.platform.upgrade(helper_path).await
    }

    /// Spawn the reader (prints collected bytes) and writer (forwards
    /// keystrokes) tasks. Mirrors the source's two worker threads.
    pub fn start(self: &Arc<Self>, config: Config) {
        self.stopped.store(false, Ordering::SeqCst);
        let reader = tokio::spawn(Arc::clone(self).run_reader(config.reader_idle_sleep));
        let writer = tokio::spawn(Arc::clone(self).run_writer());
        *self.reader_task.lock().expect("reader_task lock poisoned") = Some(reader);
        *self.writer_task.lock().expect("writer_task lock poisoned") = Some(writer);
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stop.notify_waiters();
        }
    }

    pub async fn wait_stop(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.stop.notified().await;
        self.join().await;
    }

    async fn join(&self) {
        let reader = self.reader_task.lock().expect("reader_task lock poisoned").take();
        if let Some(task) = reader {
            let _ = task.await;
        }
        let writer = self.writer_task.lock().expect("writer_task lock poisoned").take();
        if let Some(task) = writer {
            let _ = task.await;
        }
    }

    async fn run_reader(self: Arc<Self>, idle_sleep: Duration) {
        let mut stdout = io::stdout();
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            let data = self.channel.retrieve(0);
            if !data.is_empty() {
                let _ = stdout.write_all(&data).await;
                let _ = stdout.flush().await;
            } else {
                tokio::time::sleep(idle_sleep).await;
            }
        }
    }

    async fn run_writer(self: Arc<Self>) {
        let mut stdin = io::stdin();
        let mut byte = [0u8; 1];
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            match stdin.read(&mut byte).await {
                Ok(0) => {
                    self.stop();
                    break;
                }
                Ok(_) if byte[0] == 0x04 => {
                    self.stop();
                    break;
                }
                Ok(_) => {
                    let guard = self.channel.transaction_lock().acquire().await;
                    let _ = self.channel.send(&byte).await;
                    drop(guard);
                }
                Err(_) => {
                    self.stop();
                    break;
                }
            }
        }
        if self.channel.is_open() {
            self.channel.close().await;
        }
    }
}
