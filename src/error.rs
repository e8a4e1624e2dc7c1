use thiserror::Error;

/// Every failure a session can report.
///
/// `DecodeError` is the only kind that never ends a session: a frame that
/// fails to decode is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("another session is already active")]
    AlreadyActive,
    #[error("an upload is already in progress")]
    JobInProgress,
    #[error("camera unavailable: {0}")]
    MediaAcquisitionError(String),
    #[error("negotiation failed: {0}")]
    NegotiationError(String),
    #[error("channel error: {0}")]
    ChannelError(String),
    #[error("upload failed: {0}")]
    UploadTransportError(String),
    #[error("server rejected upload: {0}")]
    UploadServerError(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("frame decode failed: {0}")]
    DecodeError(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether this error ends the session that produced it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::DecodeError(_))
    }
}

impl From<webrtc::Error> for SessionError {
    fn from(e: webrtc::Error) -> Self {
        SessionError::NegotiationError(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::ChannelError(e.to_string())
    }
}

impl From<image::ImageError> for SessionError {
    fn from(e: image::ImageError) -> Self {
        SessionError::DecodeError(e.to_string())
    }
}
