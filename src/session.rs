use std::fmt;

/// Which kind of session currently owns the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    None,
    Streaming,
    Peer,
    Upload,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionKind::None => "none",
            SessionKind::Streaming => "streaming",
            SessionKind::Peer => "live stream",
            SessionKind::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Lifecycle state shared by all sessions.
///
/// Streaming and peer sessions move Idle → Connecting → (Negotiating →)
/// Active and end in Idle (after Stopping) or Failed. Upload sessions move
/// Idle → Uploading → Idle; how a job ended is its
/// [`UploadStatus`](crate::upload::UploadStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Negotiating,
    Active,
    Uploading,
    Stopping,
    Failed,
}

impl SessionState {
    /// A session in a busy state blocks any other session from starting.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Negotiating
                | SessionState::Active
                | SessionState::Uploading
                | SessionState::Stopping
        )
    }
}

/// Identifier of one session instance, used to drop events addressed to a
/// session that has already been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}
