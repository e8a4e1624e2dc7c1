//! The presentation boundary.
//!
//! The core never touches a UI surface. Everything the user sees goes through
//! a [`Renderer`], and only the coordinator hands out the [`Emitter`] that
//! calls it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use tracing::debug;
use webrtc::track::track_remote::TrackRemote;

use crate::error::SessionError;
use crate::session::{SessionId, SessionKind};

/// A decoded frame ready to be painted.
pub type Bitmap = image::RgbaImage;

/// What came back from a detection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionResult {
    Image { data: Bytes, mime: String },
    Video { data: Bytes, mime: String },
    Error(String),
}

impl DetectionResult {
    /// `data:` URL for inline display, `None` for errors.
    pub fn to_data_url(&self) -> Option<String> {
        match self {
            DetectionResult::Image { data, mime } | DetectionResult::Video { data, mime } => Some(
                format!("data:{mime};base64,{}", general_purpose::STANDARD.encode(data)),
            ),
            DetectionResult::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DetectionResult::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// An inbound media track from the peer connection.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// The live track, absent for tracks that did not come from a real
    /// peer connection.
    pub track: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// User-facing status updates.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMessage {
    Connecting(SessionKind),
    Connected(SessionKind),
    Stopped(SessionKind),
    /// Instantaneous frames per second of the streaming channel.
    FrameRate(f64),
    Uploading,
    DetectionDone,
    VideoDownloaded(PathBuf),
    DownloadFailed(String),
    ConnectionProblem,
    ConnectionRecovered,
    Failed {
        kind: SessionKind,
        error: SessionError,
    },
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMessage::Connecting(kind) => write!(f, "Connecting {kind}…"),
            StatusMessage::Connected(kind) => write!(f, "Connected {kind}"),
            StatusMessage::Stopped(kind) => write!(f, "Stopped {kind}"),
            StatusMessage::FrameRate(fps) => write!(f, "FPS: {fps:.1}"),
            StatusMessage::Uploading => f.write_str("Uploading…"),
            StatusMessage::DetectionDone => f.write_str("Detection done"),
            StatusMessage::VideoDownloaded(_) => f.write_str("Annotated video downloaded"),
            StatusMessage::DownloadFailed(reason) => {
                write!(f, "Could not save annotated video: {reason}")
            }
            StatusMessage::ConnectionProblem => f.write_str("Connection problem, reconnecting…"),
            StatusMessage::ConnectionRecovered => f.write_str("Connection recovered"),
            StatusMessage::Failed { kind, error } => match (kind, error) {
                (SessionKind::Peer, SessionError::NegotiationError(_)) => {
                    write!(f, "Failed to negotiate WebRTC: {error}")
                }
                (_, SessionError::UploadServerError(_)) => write!(f, "Detection failed: {error}"),
                (_, SessionError::UploadTransportError(_)) => write!(f, "Upload failed: {error}"),
                _ => write!(f, "Error: {error}"),
            },
        }
    }
}

/// Implemented by the presentation layer.
///
/// Calls are made while the coordinator holds its internal lock, so an
/// implementation must not call back into the coordinator.
pub trait Renderer: Send + Sync {
    fn on_status(&self, status: &StatusMessage);
    fn on_frame(&self, frame: &Bitmap);
    fn on_result(&self, result: &DetectionResult);
    fn on_loading_changed(&self, active: bool);
    fn on_remote_track(&self, track: &RemoteTrack);
}

/// Routes session output to the renderer, tagged with the emitting session.
pub struct Emitter<'a> {
    renderer: &'a dyn Renderer,
    session: SessionId,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(renderer: &'a dyn Renderer, session: SessionId) -> Self {
        Self { renderer, session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn status(&self, status: StatusMessage) {
        debug!(session = %self.session, %status, "emit status");
        self.renderer.on_status(&status);
    }

    pub fn frame(&self, frame: &Bitmap) {
        self.renderer.on_frame(frame);
    }

    pub fn result(&self, result: &DetectionResult) {
        debug!(session = %self.session, error = result.is_error(), "emit result");
        self.renderer.on_result(result);
    }

    pub fn loading(&self, active: bool) {
        debug!(session = %self.session, active, "emit loading");
        self.renderer.on_loading_changed(active);
    }

    pub fn remote_track(&self, track: &RemoteTrack) {
        debug!(session = %self.session, track = %track.id, "emit remote track");
        self.renderer.on_remote_track(track);
    }
}
