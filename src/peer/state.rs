use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::peer::connection::{close_link_later, PeerEvent, PeerLink};
use crate::peer::media::{LocalTrack, MediaSource};
use crate::peer::types::{AnswerResponse, OfferRequest, PeerDescriptor, PeerMode};
use crate::renderer::{Emitter, RemoteTrack, StatusMessage};
use crate::session::{SessionKind, SessionState};
use crate::utils::random_id;

/// What the driver has to do after a connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    Nothing,
    StartGrace,
    CancelGrace,
    Finished,
}

/// State machine of one peer session.
///
/// Owns the camera, the peer connection and the offer/answer pair. Every
/// exit path (stop, failure, drop of the coordinator's handle) goes through
/// [`Resources::release`].
pub struct PeerSession {
    state: SessionState,
    started: bool,
    camera_id: String,
    mode: PeerMode,
    media: Option<MediaSource>,
    link: Option<Arc<dyn PeerLink>>,
    descriptor: Option<PeerDescriptor>,
    remote_tracks: Vec<RemoteTrack>,
    recovering: bool,
    shutdown: Arc<Notify>,
}

/// Resources taken out of a session that is ending.
#[derive(Default)]
pub struct Resources {
    media: Option<MediaSource>,
    link: Option<Arc<dyn PeerLink>>,
    remote_tracks: Vec<RemoteTrack>,
}

impl Resources {
    /// Stops the camera now and closes the connection in the background.
    pub fn release(mut self) {
        if let Some(mut media) = self.media.take() {
            media.release();
        }
        if let Some(link) = self.link.take() {
            close_link_later(link);
        }
        if !self.remote_tracks.is_empty() {
            debug!(count = self.remote_tracks.len(), "dropping remote tracks");
        }
    }
}

impl PeerSession {
    pub fn new(camera_id: impl Into<String>, mode: PeerMode) -> Self {
        Self {
            state: SessionState::Idle,
            started: false,
            camera_id: camera_id.into(),
            mode,
            media: None,
            link: None,
            descriptor: None,
            remote_tracks: Vec::new(),
            recovering: false,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> PeerMode {
        self.mode
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn descriptor(&self) -> Option<&PeerDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn has_connection(&self) -> bool {
        self.link.is_some()
    }

    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    /// Woken when the session is stopped, so the driver can bail out.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub fn start(&mut self, out: &Emitter) -> Result<(), SessionError> {
        if self.started || self.state != SessionState::Idle {
            return Err(SessionError::AlreadyActive);
        }
        self.started = true;
        self.state = SessionState::Connecting;
        info!(session = %out.session(), camera = %self.camera_id, mode = ?self.mode, "peer session connecting");
        out.status(StatusMessage::Connecting(SessionKind::Peer));
        Ok(())
    }

    /// Takes ownership of the camera and returns the tracks to publish.
    pub fn on_media_ready(&mut self, media: MediaSource) -> Result<Vec<LocalTrack>, SessionError> {
        if self.state != SessionState::Connecting || self.media.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        let tracks = media.tracks();
        debug!(camera = %media.camera_id(), tracks = tracks.len(), "media acquired");
        self.media = Some(media);
        Ok(tracks)
    }

    pub fn on_link_created(&mut self, link: Arc<dyn PeerLink>) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting || self.link.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        self.link = Some(link);
        Ok(())
    }

    /// Records the local offer and moves to Negotiating. Only one offer may
    /// exist per session.
    pub fn begin_offer(&mut self, sdp: String, out: &Emitter) -> Result<OfferRequest, SessionError> {
        if self.descriptor.is_some()
            || matches!(self.state, SessionState::Negotiating | SessionState::Active)
        {
            return Err(SessionError::AlreadyActive);
        }
        if self.state != SessionState::Connecting || self.link.is_none() {
            return Err(SessionError::NegotiationError(format!(
                "cannot offer while {:?}",
                self.state
            )));
        }

        let descriptor = PeerDescriptor {
            id: random_id(),
            local_offer: sdp.clone(),
            remote_answer: None,
            camera_id: self.camera_id.clone(),
            created_at: Utc::now(),
        };
        debug!(session = %out.session(), offer = %descriptor.id, "negotiating");
        self.descriptor = Some(descriptor);
        self.state = SessionState::Negotiating;
        Ok(OfferRequest::new(sdp, Some(self.camera_id.clone())))
    }

    pub fn on_answer(&mut self, answer: &AnswerResponse) -> Result<(), SessionError> {
        if self.state != SessionState::Negotiating {
            return Err(SessionError::NegotiationError(format!(
                "unexpected answer while {:?}",
                self.state
            )));
        }
        match self.descriptor.as_mut() {
            Some(descriptor) if descriptor.remote_answer.is_none() => {
                descriptor.remote_answer = Some(answer.sdp.clone());
                Ok(())
            }
            _ => Err(SessionError::NegotiationError("answer already applied".into())),
        }
    }

    pub fn on_event(&mut self, event: PeerEvent, out: &Emitter) -> Followup {
        match event {
            PeerEvent::RemoteTrack(track) => {
                self.on_remote_track(track, out);
                Followup::Nothing
            }
            PeerEvent::Connected => {
                if self.recovering {
                    self.recovering = false;
                    out.status(StatusMessage::ConnectionRecovered);
                    return Followup::CancelGrace;
                }
                Followup::Nothing
            }
            PeerEvent::Disconnected => {
                if self.state != SessionState::Active || self.recovering {
                    return Followup::Nothing;
                }
                self.recovering = true;
                out.status(StatusMessage::ConnectionProblem);
                Followup::StartGrace
            }
            PeerEvent::Failed | PeerEvent::Closed => {
                self.fail(
                    SessionError::ChannelError("peer connection lost".into()),
                    out,
                );
                Followup::Finished
            }
        }
    }

    fn on_remote_track(&mut self, track: RemoteTrack, out: &Emitter) {
        if !matches!(self.state, SessionState::Negotiating | SessionState::Active) {
            debug!(track = %track.id, state = ?self.state, "ignoring remote track");
            return;
        }
        if self.remote_tracks.iter().any(|t| t.id == track.id) {
            return;
        }
        if self.state == SessionState::Negotiating {
            self.state = SessionState::Active;
            info!(session = %out.session(), "peer session active");
            out.status(StatusMessage::Connected(SessionKind::Peer));
        }
        out.remote_track(&track);
        self.remote_tracks.push(track);
    }

    pub fn on_grace_expired(&mut self, out: &Emitter) {
        if !self.recovering {
            return;
        }
        warn!(session = %out.session(), "connection did not recover within the grace period");
        self.fail(
            SessionError::ChannelError("connection lost".into()),
            out,
        );
    }

    /// Moves to Failed, reports the error once and releases everything.
    pub fn fail(&mut self, error: SessionError, out: &Emitter) {
        if matches!(self.state, SessionState::Failed | SessionState::Stopping) || !self.started {
            return;
        }
        warn!(session = %out.session(), error = %error, state = ?self.state, "peer session failed");
        self.state = SessionState::Failed;
        self.shutdown.notify_one();
        out.status(StatusMessage::Failed {
            kind: SessionKind::Peer,
            error,
        });
        self.take_resources().release();
    }

    /// Valid in every state. Returns what still has to be released.
    pub fn stop(&mut self, out: &Emitter) -> Resources {
        let was = self.state;
        self.shutdown.notify_one();
        if was == SessionState::Failed {
            return self.take_resources();
        }
        self.state = SessionState::Stopping;
        let resources = self.take_resources();
        self.state = SessionState::Idle;
        info!(session = %out.session(), from = ?was, "peer session stopped");
        if self.started {
            out.status(StatusMessage::Stopped(SessionKind::Peer));
        }
        resources
    }

    fn take_resources(&mut self) -> Resources {
        self.descriptor = None;
        self.recovering = false;
        Resources {
            media: self.media.take(),
            link: self.link.take(),
            remote_tracks: std::mem::take(&mut self.remote_tracks),
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if self.media.is_some() || self.link.is_some() {
            self.take_resources().release();
        }
    }
}
