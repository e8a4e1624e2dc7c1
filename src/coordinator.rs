//! Owns the single active session and is the only route to the renderer.
//!
//! Session drivers run as spawned tasks and touch their session only through
//! [`SessionContext`], which re-checks under the lock that the session is
//! still the current one. Events for a session that was stopped or replaced
//! are dropped there.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{ClientConfig, StreamTransport};
use crate::error::SessionError;
use crate::peer::{self, MediaProvider, PeerConnector, PeerSession, SampleTrackProvider, WebRtcConnector};
use crate::renderer::{Emitter, Renderer};
use crate::session::{SessionId, SessionKind, SessionState};
use crate::signaling::{HttpSignaling, Signaling};
use crate::streaming::{self, FrameChannelConnector, MjpegConnector, StreamingSession, WebSocketConnector};
use crate::upload::{self, HttpUploadTransport, UploadFile, UploadJob, UploadSession, UploadTransport};

/// Everything the sessions talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub frames: Arc<dyn FrameChannelConnector>,
    pub media: Arc<dyn MediaProvider>,
    pub peers: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn Signaling>,
    pub uploads: Arc<dyn UploadTransport>,
}

impl Collaborators {
    /// Network-backed collaborators for the server described by `config`.
    pub fn http(config: &ClientConfig, renderer: Arc<dyn Renderer>) -> Result<Self, SessionError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SessionError::Config(e.to_string()))?;

        let frames: Arc<dyn FrameChannelConnector> = match &config.stream {
            StreamTransport::WebSocket { path } => {
                Arc::new(WebSocketConnector::new(config.ws_url(path)?))
            }
            StreamTransport::Mjpeg { path } => {
                Arc::new(MjpegConnector::new(client.clone(), config.http_url(path)?))
            }
        };

        Ok(Self {
            renderer,
            frames,
            media: Arc::new(SampleTrackProvider::default()),
            peers: Arc::new(WebRtcConnector::new(config.ice_servers())),
            signaling: Arc::new(HttpSignaling::new(
                client.clone(),
                config.http_url(&config.offer_path)?,
            )),
            uploads: Arc::new(HttpUploadTransport::new(
                client,
                config.http_url(&config.detect_path)?,
            )),
        })
    }
}

enum Active {
    None,
    Streaming(SessionId, StreamingSession),
    Peer(SessionId, PeerSession),
}

struct Inner {
    next_id: u64,
    active: Active,
    upload: UploadSession,
    upload_task: Option<(SessionId, JoinHandle<()>)>,
}

impl Inner {
    fn next_id(&mut self) -> SessionId {
        self.next_id += 1;
        SessionId(self.next_id)
    }

    fn kind(&self) -> SessionKind {
        match &self.active {
            Active::Streaming(..) => SessionKind::Streaming,
            Active::Peer(..) => SessionKind::Peer,
            Active::None if self.upload.is_pending() => SessionKind::Upload,
            Active::None => SessionKind::None,
        }
    }

    fn state(&self) -> SessionState {
        match &self.active {
            Active::Streaming(_, session) => session.state(),
            Active::Peer(_, session) => session.state(),
            Active::None => self.upload.state(),
        }
    }
}

struct Shared {
    config: ClientConfig,
    deps: Collaborators,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Entry point of the client core. Cheap to clone.
#[derive(Clone)]
pub struct SessionCoordinator {
    shared: Arc<Shared>,
}

impl SessionCoordinator {
    pub fn new(config: ClientConfig, deps: Collaborators) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                deps,
                inner: Mutex::new(Inner {
                    next_id: 0,
                    active: Active::None,
                    upload: UploadSession::new(),
                    upload_task: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn kind(&self) -> SessionKind {
        self.shared.lock().kind()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state()
    }

    /// The current or most recent upload job.
    pub fn last_upload(&self) -> Option<UploadJob> {
        self.shared.lock().upload.job().cloned()
    }

    /// Opens the push channel and starts rendering its frames.
    pub fn start_streaming(&self) -> Result<(), SessionError> {
        let runtime = runtime()?;
        let mut inner = self.shared.lock();
        ensure_idle(&inner)?;

        let id = inner.next_id();
        let mut session = StreamingSession::new();
        session.start(&self.emitter(id))?;
        let shutdown = session.shutdown_signal();
        inner.active = Active::Streaming(id, session);
        drop(inner);

        runtime.spawn(streaming::drive(self.context(id), shutdown));
        Ok(())
    }

    /// Starts a peer session sending (or just requesting) `camera_id`.
    pub fn start_peer(&self, camera_id: &str) -> Result<(), SessionError> {
        let runtime = runtime()?;
        let mut inner = self.shared.lock();
        ensure_idle(&inner)?;

        let id = inner.next_id();
        let mut session = PeerSession::new(camera_id, self.shared.config.peer_mode);
        session.start(&self.emitter(id))?;
        let shutdown = session.shutdown_signal();
        inner.active = Active::Peer(id, session);
        drop(inner);

        runtime.spawn(peer::drive(self.context(id), shutdown));
        Ok(())
    }

    /// Sends a file for detection. The result arrives through the renderer.
    pub fn submit_upload(&self, file: UploadFile) -> Result<(), SessionError> {
        let runtime = runtime()?;
        let mut inner = self.shared.lock();
        if !matches!(inner.active, Active::None) {
            return Err(SessionError::AlreadyActive);
        }
        if inner.upload.is_pending() {
            return Err(SessionError::JobInProgress);
        }

        let id = inner.next_id();
        inner.upload.submit(file.clone(), &self.emitter(id))?;
        let task = runtime.spawn(upload::drive(self.context(id), file));
        inner.upload_task = Some((id, task));
        Ok(())
    }

    /// Tears down whatever is running. Safe to call at any time; nothing from
    /// the stopped session reaches the renderer once this returns.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        let was = inner.kind();

        match std::mem::replace(&mut inner.active, Active::None) {
            Active::None => {}
            Active::Streaming(id, mut session) => session.stop(&self.emitter(id)),
            Active::Peer(id, mut session) => session.stop(&self.emitter(id)).release(),
        }

        if let Some((id, task)) = inner.upload_task.take() {
            task.abort();
            inner.upload.cancel(&self.emitter(id));
        }

        if was == SessionKind::None {
            debug!("stop with nothing running");
        } else {
            info!(kind = %was, "session stopped");
        }
    }

    fn emitter(&self, id: SessionId) -> Emitter<'_> {
        Emitter::new(self.shared.deps.renderer.as_ref(), id)
    }

    fn context(&self, id: SessionId) -> SessionContext {
        SessionContext {
            id,
            shared: self.shared.clone(),
        }
    }
}

fn ensure_idle(inner: &Inner) -> Result<(), SessionError> {
    if matches!(inner.active, Active::None) && !inner.upload.is_pending() {
        Ok(())
    } else {
        Err(SessionError::AlreadyActive)
    }
}

fn runtime() -> Result<Handle, SessionError> {
    Handle::try_current().map_err(|_| SessionError::Config("no tokio runtime".into()))
}

/// A driver's handle on its own session.
#[derive(Clone)]
pub(crate) struct SessionContext {
    id: SessionId,
    shared: Arc<Shared>,
}

impl SessionContext {
    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub(crate) fn deps(&self) -> &Collaborators {
        &self.shared.deps
    }

    /// Runs `f` on the streaming session if it is still the current one.
    pub(crate) fn with_streaming<R>(
        &self,
        f: impl FnOnce(&mut StreamingSession, &Emitter) -> R,
    ) -> Option<R> {
        let mut inner = self.shared.lock();
        let Active::Streaming(id, session) = &mut inner.active else {
            return None;
        };
        if *id != self.id {
            return None;
        }
        let result = f(session, &self.emitter());
        if session.state() == SessionState::Failed {
            debug!(session = %self.id, "retiring failed streaming session");
            inner.active = Active::None;
        }
        Some(result)
    }

    /// Runs `f` on the peer session if it is still the current one.
    pub(crate) fn with_peer<R>(&self, f: impl FnOnce(&mut PeerSession, &Emitter) -> R) -> Option<R> {
        let mut inner = self.shared.lock();
        let Active::Peer(id, session) = &mut inner.active else {
            return None;
        };
        if *id != self.id {
            return None;
        }
        let result = f(session, &self.emitter());
        if session.state() == SessionState::Failed {
            debug!(session = %self.id, "retiring failed peer session");
            inner.active = Active::None;
        }
        Some(result)
    }

    /// Runs `f` on the upload session if this job is still the pending one.
    pub(crate) fn with_upload<R>(
        &self,
        f: impl FnOnce(&mut UploadSession, &Emitter) -> R,
    ) -> Option<R> {
        let mut inner = self.shared.lock();
        if !matches!(&inner.upload_task, Some((id, _)) if *id == self.id) {
            return None;
        }
        let result = f(&mut inner.upload, &self.emitter());
        if !inner.upload.is_pending() {
            inner.upload_task = None;
        }
        Some(result)
    }

    fn emitter(&self) -> Emitter<'_> {
        Emitter::new(self.shared.deps.renderer.as_ref(), self.id)
    }
}
