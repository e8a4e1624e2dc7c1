//! Client-side session controller for a remote video-detection server.
//!
//! Three interaction modes share one rendering surface: a pushed frame
//! stream, a negotiated live peer connection, and one-shot file uploads.
//! [`SessionCoordinator`] keeps at most one of them active and forwards
//! everything user-visible to a [`Renderer`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod peer;
pub mod renderer;
pub mod session;
pub mod signaling;
pub mod streaming;
pub mod upload;
pub mod utils;

pub use config::{ClientConfig, StreamTransport};
pub use coordinator::{Collaborators, SessionCoordinator};
pub use error::SessionError;
pub use renderer::{Bitmap, DetectionResult, Emitter, RemoteTrack, Renderer, StatusMessage, TrackKind};
pub use session::{SessionId, SessionKind, SessionState};
pub use upload::{UploadFile, UploadJob, UploadStatus};
