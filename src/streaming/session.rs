use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::renderer::{Bitmap, Emitter, StatusMessage};
use crate::session::{SessionKind, SessionState};

/// Frames closer together than this arrived in the same read (several MJPEG
/// parts in one chunk) and give no usable rate sample.
const MIN_RATE_INTERVAL: Duration = Duration::from_millis(1);

/// Decode one pushed frame into a bitmap.
pub fn decode_frame(payload: &Bytes) -> Result<Bitmap, SessionError> {
    Ok(image::load_from_memory(payload)?.to_rgba8())
}

/// State machine of one streaming channel session.
pub struct StreamingSession {
    state: SessionState,
    started: bool,
    last_arrival: Option<Instant>,
    frames_rendered: u64,
    frames_dropped: u64,
    shutdown: Arc<Notify>,
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            started: false,
            last_arrival: None,
            frames_rendered: 0,
            frames_dropped: 0,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub fn start(&mut self, out: &Emitter) -> Result<(), SessionError> {
        if self.started || self.state != SessionState::Idle {
            return Err(SessionError::AlreadyActive);
        }
        self.started = true;
        self.state = SessionState::Connecting;
        info!(session = %out.session(), "streaming session connecting");
        out.status(StatusMessage::Connecting(SessionKind::Streaming));
        Ok(())
    }

    pub fn on_open(&mut self, out: &Emitter) {
        debug!(session = %out.session(), "push channel open");
    }

    /// Handles one arrived frame. Returns false when the frame was discarded
    /// because the session no longer renders.
    pub fn on_frame(
        &mut self,
        decoded: Result<Bitmap, SessionError>,
        arrived: Instant,
        out: &Emitter,
    ) -> bool {
        if !matches!(self.state, SessionState::Connecting | SessionState::Active) {
            debug!(session = %out.session(), state = ?self.state, "discarding late frame");
            return false;
        }

        let previous = self.last_arrival.replace(arrived);
        let bitmap = match decoded {
            Ok(bitmap) => bitmap,
            Err(error) => {
                self.frames_dropped += 1;
                warn!(session = %out.session(), %error, dropped = self.frames_dropped, "dropping frame");
                return true;
            }
        };

        if self.state == SessionState::Connecting {
            self.state = SessionState::Active;
            info!(session = %out.session(), "streaming session active");
            out.status(StatusMessage::Connected(SessionKind::Streaming));
        }

        out.frame(&bitmap);
        self.frames_rendered += 1;

        if let Some(previous) = previous {
            let delta = arrived.saturating_duration_since(previous);
            if delta >= MIN_RATE_INTERVAL {
                out.status(StatusMessage::FrameRate(1.0 / delta.as_secs_f64()));
            }
        }
        true
    }

    /// The server closed the channel, or it broke.
    pub fn on_closed(&mut self, error: Option<SessionError>, out: &Emitter) {
        let error =
            error.unwrap_or_else(|| SessionError::ChannelError("closed by server".into()));
        self.fail(error, out);
    }

    pub fn fail(&mut self, error: SessionError, out: &Emitter) {
        if !matches!(self.state, SessionState::Connecting | SessionState::Active) {
            return;
        }
        warn!(session = %out.session(), %error, rendered = self.frames_rendered, "streaming session failed");
        self.state = SessionState::Failed;
        self.shutdown.notify_one();
        out.status(StatusMessage::Failed {
            kind: SessionKind::Streaming,
            error,
        });
    }

    /// Stops rendering immediately; the driver closes the channel.
    pub fn stop(&mut self, out: &Emitter) {
        self.shutdown.notify_one();
        if self.state == SessionState::Failed {
            return;
        }
        let was = self.state;
        self.state = SessionState::Stopping;
        self.last_arrival = None;
        self.state = SessionState::Idle;
        info!(session = %out.session(), from = ?was, rendered = self.frames_rendered, "streaming session stopped");
        if self.started {
            out.status(StatusMessage::Stopped(SessionKind::Streaming));
        }
    }
}
