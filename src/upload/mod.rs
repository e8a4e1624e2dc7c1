pub mod transport;

pub use transport::{HttpUploadTransport, UploadFile, UploadResponse, UploadTransport};

use std::path::{Path, PathBuf};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::coordinator::SessionContext;
use crate::error::SessionError;
use crate::renderer::{DetectionResult, Emitter, StatusMessage};
use crate::session::{SessionKind, SessionState};
use crate::utils::is_image_content_type;

/// File name used for downloaded video results.
pub const VIDEO_FILE_NAME: &str = "annotated.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct UploadJob {
    pub file: UploadFile,
    pub status: UploadStatus,
    pub result: Option<DetectionResult>,
}

/// Maps a detection response onto a result by its declared content type.
pub fn classify(response: &UploadResponse) -> Result<DetectionResult, SessionError> {
    if !response.is_success() {
        let detail = String::from_utf8_lossy(&response.body);
        let detail = detail.trim();
        let message = if detail.is_empty() {
            format!("HTTP {}", response.status)
        } else {
            format!("HTTP {}: {}", response.status, truncate(detail, 200))
        };
        return Err(SessionError::UploadServerError(message));
    }

    let mime = response
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    let data = response.body.clone();
    if is_image_content_type(&mime) {
        Ok(DetectionResult::Image { data, mime })
    } else {
        Ok(DetectionResult::Video { data, mime })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Reusable "submit a file, await the result" session. Holds at most one
/// pending job.
#[derive(Default)]
pub struct UploadSession {
    state: UploadPhase,
    job: Option<UploadJob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum UploadPhase {
    #[default]
    Idle,
    Uploading,
}

impl UploadSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            UploadPhase::Idle => SessionState::Idle,
            UploadPhase::Uploading => SessionState::Uploading,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&self.job, Some(job) if job.status == UploadStatus::Pending)
    }

    /// The current or most recent job.
    pub fn job(&self) -> Option<&UploadJob> {
        self.job.as_ref()
    }

    pub fn submit(&mut self, file: UploadFile, out: &Emitter) -> Result<(), SessionError> {
        if self.is_pending() {
            return Err(SessionError::JobInProgress);
        }
        info!(session = %out.session(), file = %file.name, bytes = file.data.len(), "upload submitted");
        self.job = Some(UploadJob {
            file,
            status: UploadStatus::Pending,
            result: None,
        });
        self.state = UploadPhase::Uploading;
        out.loading(true);
        out.status(StatusMessage::Uploading);
        Ok(())
    }

    /// Terminal response (or transport failure) for the pending job.
    /// `saved` reports the optional video download.
    pub fn on_response(
        &mut self,
        response: Result<UploadResponse, SessionError>,
        saved: Option<Result<PathBuf, String>>,
        out: &Emitter,
    ) {
        let Some(job) = self.job.as_mut().filter(|job| job.status == UploadStatus::Pending) else {
            warn!(session = %out.session(), "response without a pending upload");
            return;
        };

        out.loading(false);
        match response.and_then(|r| classify(&r)) {
            Ok(result) => {
                info!(session = %out.session(), file = %job.file.name, "upload finished");
                job.status = UploadStatus::Succeeded;
                out.result(&result);
                out.status(StatusMessage::DetectionDone);
                match saved {
                    Some(Ok(path)) => out.status(StatusMessage::VideoDownloaded(path)),
                    Some(Err(reason)) => out.status(StatusMessage::DownloadFailed(reason)),
                    None => {}
                }
                job.result = Some(result);
            }
            Err(error) => {
                warn!(session = %out.session(), file = %job.file.name, %error, "upload failed");
                let result = DetectionResult::Error(error.to_string());
                job.status = UploadStatus::Failed;
                out.result(&result);
                out.status(StatusMessage::Failed {
                    kind: SessionKind::Upload,
                    error,
                });
                job.result = Some(result);
            }
        }
        self.state = UploadPhase::Idle;
    }

    /// Abandons the pending job, if any. Returns whether there was one.
    pub fn cancel(&mut self, out: &Emitter) -> bool {
        let Some(job) = self.job.as_mut().filter(|job| job.status == UploadStatus::Pending) else {
            return false;
        };
        info!(session = %out.session(), file = %job.file.name, "upload cancelled");
        job.status = UploadStatus::Failed;
        self.state = UploadPhase::Idle;
        out.loading(false);
        out.status(StatusMessage::Stopped(SessionKind::Upload));
        true
    }
}

/// Writes a video result to `dir/annotated.mp4`.
pub async fn save_video(dir: &Path, data: &[u8]) -> Result<PathBuf, String> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("{}: {e}", dir.display()))?;
    let path = dir.join(VIDEO_FILE_NAME);
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(path)
}

/// Runs one upload job to its terminal response.
pub(crate) async fn drive(ctx: SessionContext, file: UploadFile) {
    let config = ctx.config();
    let response = timeout(config.upload_timeout, ctx.deps().uploads.upload(&file))
        .await
        .unwrap_or(Err(SessionError::Timeout("upload")));

    let saved = match (&response, &config.download_dir) {
        (Ok(r), Some(dir))
            if r.is_success()
                && !r.content_type.as_deref().is_some_and(is_image_content_type) =>
        {
            Some(save_video(dir, &r.body).await)
        }
        _ => None,
    };

    ctx.with_upload(|session, out| session.on_response(response, saved, out));
}
