//! The top-level session/listener registry the CLI drives. Owns id
//! allocation, the selected-session pointer, and the reaper that removes
//! sessions/listeners once their channel reports an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::Channel;
use crate::config::Config;
use crate::error::{LocalIoError, TransferError, TransportError, UsageError};
use crate::ids::{IdCounter, ListenerId, SessionId};
use crate::listener::{tcp::TcpListenerAdapter, tls::TlsListenerAdapter, Listener};
use crate::platform::PlatformKind;
use crate::session::Session;
use crate::style;
use crate::transport::tcp;
use crate::transport::tls::{self as tls_transport, TlsOptions};
use crate::transport::ChannelProtocol;

enum Broken {
    Session(SessionId),
    Listener(ListenerId),
}

/// Which wire transport to use for a `connect`/`listen` call. Named
/// distinctly from [`crate::transport::Transport`] (the per-connection byte
/// stream trait) to keep the two apart at call sites.
pub enum TransportKind {
    Tcp,
    Tls(TlsOptions),
}

pub struct Manager {
    config: Config,
    sessions: StdMutex<HashMap<SessionId, Arc<Session>>>,
    listeners: StdMutex<HashMap<ListenerId, (Arc<dyn Listener>, Option<JoinHandle<()>>)>>,
    selected: StdMutex<Option<SessionId>>,
    session_ids: IdCounter,
    listener_ids: IdCounter,
    broken_tx: mpsc::UnboundedSender<Broken>,
    broken_rx: StdMutex<Option<mpsc::UnboundedReceiver<Broken>>>,
    reaper: StdMutex<Option<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(config: Config) -> Arc<Self> {
        let (broken_tx, broken_rx) = mpsc::unbounded_channel();
        Arc::new(Manager {
            config,
            sessions: StdMutex::new(HashMap::new()),
            listeners: StdMutex::new(HashMap::new()),
            selected: StdMutex::new(None),
            session_ids: IdCounter::default(),
            listener_ids: IdCounter::default(),
            broken_tx,
            broken_rx: StdMutex::new(Some(broken_rx)),
            reaper: StdMutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let mut reaper = self.reaper.lock().expect("reaper lock poisoned");
        if reaper.is_some() {
            return;
        }
        let rx = self
            .broken_rx
            .lock()
            .expect("broken_rx lock poisoned")
            .take()
            .expect("reaper started twice");
        let manager = Arc::clone(self);
        *reaper = Some(tokio::spawn(manager.reap(rx)));
    }

    pub fn stop(&self) {
        if let Some(task) = self.reaper.lock().expect("reaper lock poisoned").take() {
            task.abort();
        }
    }

    async fn reap(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Broken>) {
        while let Some(broken) = rx.recv().await {
            match broken {
                Broken::Session(id) => {
                    if self.sessions.lock().expect("sessions lock poisoned").contains_key(&id) {
                        let _ = self.kill_session(id).await;
                    }
                }
                Broken::Listener(id) => {
                    if self.listeners.lock().expect("listeners lock poisoned").contains_key(&id) {
                        self.kill_listener(id).await;
                    }
                }
            }
        }
    }

    async fn open_transport(transport: &TransportKind, host: &str, port: u16) -> Result<Box<dyn crate::transport::Transport>, TransportError> {
        match transport {
            TransportKind::Tcp => Ok(Box::new(tcp::connect(host, port).await?)),
            TransportKind::Tls(opts) => Ok(Box::new(tls_transport::connect(host, port, opts).await?)),
        }
    }

    fn error_callback(self: &Arc<Self>, id: SessionId) -> crate::channel::ErrorCallback {
        let manager = Arc::clone(self);
        Arc::new(move |message: String| {
            log::warn!("{}", style::error_line(&message));
            let _ = manager.broken_tx.send(Broken::Session(id));
        })
    }

    /// Connect out to a remote listener, attach the operator's terminal to
    /// it immediately, and block until that interactive session ends —
    /// exactly the foreground path `listen()` takes for its single-shot
    /// accept, and what `original_source/redcat/manager.py::connect()` does.
    /// The session is only registered once the operator drops back out of
    /// it, not before.
    pub async fn connect(self: &Arc<Self>, host: &str, port: u16, transport: TransportKind, platform: PlatformKind) -> Result<SessionId, String> {
        let raw_transport = Self::open_transport(&transport, host, port)
            .await
            .map_err(|err| style::bold(&err.to_string()))?;
        let id = SessionId(self.session_ids.next());
        let channel = Channel::new(raw_transport, self.config.clone());
        channel.set_error_callback(self.error_callback(id));
        let session = Session::new(id, channel, platform);
        session.open().await.map_err(|err| style::bold(&err.to_string()))?;
        session.wait_open(self.config.open_wait_timeout).await;
        let label = id.to_string();
        session.interactive(true, &label).await;
        session.start(self.config.clone());
        session.wait_stop().await;
        session.interactive(false, &label).await;
        self.register_preinteractive(id, session);
        Ok(id)
    }

    async fn warm_up_and_register(self: &Arc<Self>, id: SessionId, session: Arc<Session>) -> Result<SessionId, String> {
        let label = id.to_string();
        let warmed_on = session.interactive(true, &label).await;
        let warmed_off = session.interactive(false, &label).await;
        if !(warmed_on && warmed_off) {
            session.close().await;
            return Err(style::bold(&format!("session {id} is broken")));
        }
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        sessions.insert(id, Arc::clone(&session));
        drop(sessions);
        let mut selected = self.selected.lock().expect("selected lock poisoned");
        if selected.is_none() {
            *selected = Some(id);
        }
        drop(selected);
        log::info!(
            "{} session {}, connected to {}, is now ready",
            style::bold(&style::blue(protocol_name(session.protocol()))),
            style::bold(&style::darkcyan(&label)),
            style::bold(&style::blue(&format!("{}@{}", session.user().await, session.hostname().await)))
        );
        Ok(id)
    }

    /// `background = true` spawns a detached accept loop turning every
    /// inbound connection into a registered, pty-warmed session (the
    /// source's `__on_new_channel`). `background = false` accepts exactly
    /// one connection, attaches the operator's terminal to it immediately,
    /// and only registers it once that interactive session ends.
    pub async fn listen(self: &Arc<Self>, host: &str, port: u16, transport: TransportKind, platform: PlatformKind, background: bool) -> Result<ListenerId, String> {
        let listener: Arc<dyn Listener> = match transport {
            TransportKind::Tcp => Arc::new(
                TcpListenerAdapter::bind(host, port, platform)
                    .await
                    .map_err(|err| style::bold(&err.to_string()))?,
            ),
            TransportKind::Tls(opts) => Arc::new(
                TlsListenerAdapter::bind(host, port, platform, opts)
                    .await
                    .map_err(|err| style::bold(&err.to_string()))?,
            ),
        };
        let id = ListenerId(self.listener_ids.next());
        log::info!("listener {} created and listening on {}", style::blue(&id.to_string()), listener.endpoint());

        if background {
            let manager = Arc::clone(self);
            let listener_for_task = Arc::clone(&listener);
            let task = tokio::spawn(async move {
                loop {
                    match listener_for_task.accept(&manager.config).await {
                        Ok(channel) => {
                            let session_id = SessionId(manager.session_ids.next());
                            channel.set_error_callback(manager.error_callback(session_id));
                            let session = Session::new(session_id, channel, listener_for_task.platform());
                            if session.open().await.is_err() {
                                continue;
                            }
                            if !session.wait_open(manager.config.open_wait_timeout).await {
                                session.close().await;
                                continue;
                            }
                            // failure here has already closed the session and logged why
                            let _ = manager.warm_up_and_register(session_id, session).await;
                        }
                        Err(err) => {
                            log::warn!("listener {id} failed: {err}");
                            let _ = manager.broken_tx.send(Broken::Listener(id));
                            break;
                        }
                    }
                }
            });
            self.listeners.lock().expect("listeners lock poisoned").insert(id, (listener, Some(task)));
        } else {
            let channel = listener.accept(&self.config).await.map_err(|err| style::bold(&err.to_string()))?;
            let session_id = SessionId(self.session_ids.next());
            channel.set_error_callback(self.error_callback(session_id));
            let session = Session::new(session_id, channel, listener.platform());
            session.open().await.map_err(|err| style::bold(&err.to_string()))?;
            session.wait_open(self.config.open_wait_timeout).await;
            let label = session_id.to_string();
            session.interactive(true, &label).await;
            session.start(self.config.clone());
            session.wait_stop().await;
            session.interactive(false, &label).await;
            self.register_preinteractive(session_id, session);
        }
        Ok(id)
    }

    /// Same bookkeeping as `warm_up_and_register`, but the session has
    /// already done its interactive round-trip (the foreground `listen`
    /// path) rather than the background path's silent pty warm-up.
    fn register_preinteractive(&self, id: SessionId, session: Arc<Session>) {
        self.sessions.lock().expect("sessions lock poisoned").insert(id, session);
        let mut selected = self.selected.lock().expect("selected lock poisoned");
        if selected.is_none() {
            *selected = Some(id);
        }
    }

    pub async fn kill(&self, kind: &str, id_str: &str) -> Result<(), UsageError> {
        match kind {
            "session" => {
                let id: SessionId = id_str.parse().map_err(|_| UsageError::UnknownSession(id_str.to_string()))?;
                self.kill_session(id).await
            }
            "listener" => {
                let id: ListenerId = id_str.parse().map_err(|_| UsageError::UnknownListener(id_str.to_string()))?;
                if !self.listeners.lock().expect("listeners lock poisoned").contains_key(&id) {
                    return Err(UsageError::UnknownListener(id_str.to_string()));
                }
                self.kill_listener(id).await;
                Ok(())
            }
            other => Err(UsageError::InvalidParameter(other.to_string())),
        }
    }

    async fn kill_session(&self, id: SessionId) -> Result<(), UsageError> {
        let session = self.sessions.lock().expect("sessions lock poisoned").remove(&id);
        match session {
            Some(session) => {
                session.close().await;
                let mut selected = self.selected.lock().expect("selected lock poisoned");
                if *selected == Some(id) {
                    *selected = None;
                }
                log::info!("session {} has been removed", style::bold(&style::darkcyan(&id.to_string())));
                Ok(())
            }
            None => Err(UsageError::UnknownSession(id.to_string())),
        }
    }

    async fn kill_listener(&self, id: ListenerId) {
        let entry = self.listeners.lock().expect("listeners lock poisoned").remove(&id);
        if let Some((listener, task)) = entry {
            if let Some(task) = task {
                task.abort();
            }
            listener.stop().await;
            log::info!("listener {} has been removed", style::bold(&style::darkcyan(&id.to_string())));
        }
    }

    pub fn select_session(&self, id_str: &str) -> Result<(), UsageError> {
        if id_str == "none" {
            *self.selected.lock().expect("selected lock poisoned") = None;
            return Ok(());
        }
        let id: SessionId = id_str.parse().map_err(|_| UsageError::UnknownSession(id_str.to_string()))?;
        if !self.sessions.lock().expect("sessions lock poisoned").contains_key(&id) {
            return Err(UsageError::UnknownSession(id_str.to_string()));
        }
        *self.selected.lock().expect("selected lock poisoned") = Some(id);
        Ok(())
    }

    fn resolve_session(&self, id_str: &str) -> Result<Arc<Session>, UsageError> {
        let id = if id_str.is_empty() {
            self.selected.lock().expect("selected lock poisoned").ok_or_else(|| UsageError::NoSessionSelected("operation".to_string()))?
        } else {
            id_str.parse().map_err(|_| UsageError::UnknownSession(id_str.to_string()))?
        };
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| UsageError::UnknownSession(id.to_string()))
    }

    pub async fn remote_shell(&self, id_str: &str) -> Result<(), UsageError> {
        let session = self.resolve_session(id_str)?;
        if !session.is_open() {
            return Err(UsageError::UnknownSession(id_str.to_string()));
        }
        let label = session.id().to_string();
        session.interactive(true, &label).await;
        session.start(self.config.clone());
        session.wait_stop().await;
        session.interactive(false, &label).await;
        Ok(())
    }

    pub async fn upgrade(&self, id_str: &str, helper_path: Option<&std::path::Path>) -> Result<(), UsageError> {
        let session = self.resolve_session(id_str)?;
        let (ok, message) = session.upgrade(helper_path).await;
        if ok {
            log::info!("session {} has been successfully upgraded", style::bold(&style::darkcyan(&session.id().to_string())));
            Ok(())
        } else {
            log::warn!("{}", style::error_line(&message));
            Err(UsageError::InvalidParameter(message))
        }
    }

    pub async fn show(&self, kind: &str) -> Result<String, UsageError> {
        match kind {
            "sessions" => {
                let sessions = self.sessions.lock().expect("sessions lock poisoned").clone_refs();
                let mut rows = Vec::with_capacity(sessions.len());
                for (id, session) in sessions {
                    rows.push(format!(
                        "{},{},{},{},{},{}",
                        style::bold(&style::cyan(&id.to_string())),
                        style::bold(&style::blue(&session.user().await)),
                        style::bold(&style::blue(&session.hostname().await)),
                        style::bold(&style::blue(&session.remote())),
                        style::bold(&style::blue(protocol_name(session.protocol()))),
                        style::bold(&style::yellow(session.platform_name())),
                    ));
                }
                Ok(rows.join("\n"))
            }
            "listeners" => {
                let listeners = self.listeners.lock().expect("listeners lock poisoned");
                let rows: Vec<String> = listeners
                    .iter()
                    .map(|(id, (listener, _))| {
                        format!(
                            "{},{},{},{}",
                            style::bold(&style::darkcyan(&id.to_string())),
                            style::bold(&style::blue(&listener.endpoint())),
                            style::bold(&style::blue(protocol_name(listener.protocol()))),
                            style::bold(&style::yellow(listener.platform().as_str())),
                        )
                    })
                    .collect();
                Ok(rows.join("\n"))
            }
            other => Err(UsageError::InvalidParameter(other.to_string())),
        }
    }

    pub async fn get_session_info(&self, id_str: &str) -> String {
        match self.resolve_session(id_str) {
            Ok(session) => format!("session {}: {}@{}", session.id(), session.user().await, session.hostname().await),
            Err(_) => String::new(),
        }
    }

    pub async fn download(&self, rfile: &str, lfile: &str, id_str: &str) -> Result<(), TransferError> {
        let rfile = shlex::quote(rfile).into_owned();
        let session = self.resolve_session(id_str).map_err(|err| TransferError::Remote(err.to_string()))?;
        let (ok, error, data) = session.download(&rfile).await;
        if !ok {
            return Err(TransferError::Remote(error));
        }
        tokio::fs::write(lfile, &data)
            .await
            .map_err(|err| LocalIoError::from_io(lfile, err))?;
        Ok(())
    }

    pub async fn upload(&self, lfile: &str, rfile: &str, id_str: &str) -> Result<(), TransferError> {
        let session = self.resolve_session(id_str).map_err(|err| TransferError::Remote(err.to_string()))?;
        let data = tokio::fs::read(lfile).await.map_err(|err| LocalIoError::from_io(lfile, err))?;
        let (ok, error) = session.upload(rfile, bytes::Bytes::from(data)).await;
        if !ok {
            return Err(TransferError::Remote(error));
        }
        Ok(())
    }

    /// Stop every listener and close every session — used on shutdown and
    /// by the `clear` CLI command.
    pub async fn clear(&self) {
        let listener_ids: Vec<ListenerId> = self.listeners.lock().expect("listeners lock poisoned").keys().copied().collect();
        for id in listener_ids {
            self.kill_listener(id).await;
        }
        let sessions: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in sessions {
            session.close().await;
        }
    }
}

fn protocol_name(protocol: ChannelProtocol) -> &'static str {
    protocol.as_str()
}

/// Small helper: `HashMap<SessionId, Arc<Session>>` clone of the id/Arc
/// pairs without holding the map lock across the `.await`s `show` needs.
trait CloneRefs<K: Clone, V: Clone> {
    fn clone_refs(&self) -> Vec<(K, V)>;
}

impl<K: Clone, V: Clone> CloneRefs<K, V> for HashMap<K, V> {
    fn clone_refs(&self) -> Vec<(K, V)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
