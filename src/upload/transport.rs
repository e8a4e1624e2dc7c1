use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info};
use url::Url;

use crate::error::SessionError;

/// A file picked or dropped by the user.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, SessionError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| SessionError::UploadTransportError(format!("{}: {e}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());
        Ok(Self::new(name, data))
    }

    /// Content type guessed from the file name.
    pub fn mime(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// Raw answer of the detection endpoint.
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UploadResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a file to the detection endpoint. Transport problems are
/// `UploadTransportError`; any HTTP answer, even an error status, is a
/// response.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(&self, file: &UploadFile) -> Result<UploadResponse, SessionError>;
}

pub struct HttpUploadTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpUploadTransport {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn upload(&self, file: &UploadFile) -> Result<UploadResponse, SessionError> {
        let part = Part::bytes(file.data.to_vec())
            .file_name(file.name.clone())
            .mime_str(&file.mime())
            .map_err(|e| SessionError::UploadTransportError(e.to_string()))?;
        let form = Form::new().part("file", part);

        info!(url = %self.url, file = %file.name, bytes = file.data.len(), "uploading");
        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| SessionError::UploadTransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| SessionError::UploadTransportError(e.to_string()))?;
        debug!(status, ?content_type, bytes = body.len(), "detection response");

        Ok(UploadResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_follows_the_extension() {
        assert_eq!(UploadFile::new("street.jpg", Bytes::new()).mime(), "image/jpeg");
        assert_eq!(UploadFile::new("clip.mp4", Bytes::new()).mime(), "video/mp4");
        assert_eq!(
            UploadFile::new("blob", Bytes::new()).mime(),
            "application/octet-stream"
        );
    }
}
