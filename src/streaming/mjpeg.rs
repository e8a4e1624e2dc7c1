//! `multipart/x-mixed-replace` JPEG feeds over plain HTTP.
//!
//! Each part is `--<boundary>\r\n<headers>\r\n\r\n<jpeg>\r\n`. Parts with a
//! `Content-Length` header are cut by length, others at the next boundary.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};
use url::Url;

use crate::error::SessionError;
use crate::streaming::channel::{FrameChannel, FrameChannelConnector};

const DEFAULT_BOUNDARY: &str = "frame";

/// Largest part accepted from a feed, headers included.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Incremental splitter for a multipart frame stream.
pub struct MjpegParser {
    delimiter: Vec<u8>,
    buf: BytesMut,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.trim_start_matches("--");
        Self {
            delimiter: format!("--{boundary}").into_bytes(),
            buf: BytesMut::new(),
        }
    }

    /// Feed a chunk, get back every frame it completed. Fails on a part
    /// that declares or grows beyond [`MAX_FRAME_BYTES`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, SessionError> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find(&self.buf, &self.delimiter, 0) else {
                // keep only what could be the start of a split delimiter
                let keep = self.delimiter.len() - 1;
                if self.buf.len() > keep {
                    let _ = self.buf.split_to(self.buf.len() - keep);
                }
                break;
            };
            if start > 0 {
                let _ = self.buf.split_to(start);
            }

            let Some(header_end) = find(&self.buf, b"\r\n\r\n", self.delimiter.len()) else {
                if self.buf.len() > MAX_FRAME_BYTES {
                    return Err(oversized(self.buf.len()));
                }
                break;
            };
            let body_start = header_end + 4;
            let headers = &self.buf[self.delimiter.len()..header_end];

            let body_end = match content_length(headers) {
                Some(len) => match body_start.checked_add(len) {
                    Some(end) if end <= MAX_FRAME_BYTES => {
                        if self.buf.len() < end {
                            break;
                        }
                        end
                    }
                    _ => return Err(oversized(len)),
                },
                None => match find(&self.buf, &self.delimiter, body_start) {
                    Some(next) if next >= body_start + 2 && &self.buf[next - 2..next] == b"\r\n" => {
                        next - 2
                    }
                    Some(next) => next,
                    None if self.buf.len() > MAX_FRAME_BYTES => {
                        return Err(oversized(self.buf.len()))
                    }
                    None => break,
                },
            };

            let mut part = self.buf.split_to(body_end);
            let body = part.split_off(body_start).freeze();
            if !body.is_empty() {
                frames.push(body);
            }
        }
        Ok(frames)
    }
}

fn oversized(len: usize) -> SessionError {
    SessionError::ChannelError(format!(
        "mjpeg part of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
    ))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers).lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// `boundary` parameter of a multipart content type.
fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

pub struct MjpegConnector {
    client: reqwest::Client,
    url: Url,
}

impl MjpegConnector {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl FrameChannelConnector for MjpegConnector {
    async fn open(&self) -> Result<Box<dyn FrameChannel>, SessionError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SessionError::ChannelError(e.to_string()))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.to_ascii_lowercase().starts_with("multipart/") {
            return Err(SessionError::ChannelError(format!(
                "expected a multipart feed, got {content_type:?}"
            )));
        }
        let boundary = boundary_of(&content_type).unwrap_or_else(|| DEFAULT_BOUNDARY.into());
        info!(url = %self.url, %boundary, "mjpeg feed open");

        Ok(Box::new(MjpegChannel {
            response: Some(response),
            parser: MjpegParser::new(&boundary),
            pending: VecDeque::new(),
        }))
    }
}

pub struct MjpegChannel {
    response: Option<reqwest::Response>,
    parser: MjpegParser,
    pending: VecDeque<Bytes>,
}

#[async_trait]
impl FrameChannel for MjpegChannel {
    async fn next_frame(&mut self) -> Result<Option<Bytes>, SessionError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };
            match response.chunk().await {
                Ok(Some(chunk)) => match self.parser.push(&chunk) {
                    Ok(frames) => self.pending.extend(frames),
                    Err(e) => {
                        self.response = None;
                        return Err(e);
                    }
                },
                Ok(None) => {
                    self.response = None;
                    return Ok(None);
                }
                Err(e) => {
                    self.response = None;
                    return Err(SessionError::ChannelError(e.to_string()));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.response.take().is_some() {
            debug!("mjpeg feed closed");
        }
    }
}
