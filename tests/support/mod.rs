#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use vislink::peer::{
    AnswerResponse, CaptureDevice, LocalTrack, MediaProvider, MediaSource, OfferRequest,
    PeerConnector, PeerEvent, PeerLink,
};
use vislink::signaling::Signaling;
use vislink::streaming::{FrameChannel, FrameChannelConnector};
use vislink::upload::{UploadResponse, UploadTransport};
use vislink::{
    Bitmap, ClientConfig, Collaborators, DetectionResult, RemoteTrack, Renderer, SessionCoordinator,
    SessionError, StatusMessage, TrackKind, UploadFile,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(StatusMessage),
    Frame,
    Result(DetectionResult),
    Loading(bool),
    Track(String),
}

#[derive(Default)]
pub struct RecordingRenderer {
    events: Mutex<Vec<Event>>,
}

impl RecordingRenderer {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn frames(&self) -> usize {
        self.events().iter().filter(|e| matches!(e, Event::Frame)).count()
    }

    pub fn statuses(&self) -> Vec<StatusMessage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<DetectionResult> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Result(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn loading(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Loading(on) => Some(on),
                _ => None,
            })
            .collect()
    }

    pub fn frame_rates(&self) -> Vec<f64> {
        self.statuses()
            .into_iter()
            .filter_map(|s| match s {
                StatusMessage::FrameRate(fps) => Some(fps),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Renderer for RecordingRenderer {
    fn on_status(&self, status: &StatusMessage) {
        self.push(Event::Status(status.clone()));
    }
    fn on_frame(&self, _: &Bitmap) {
        self.push(Event::Frame);
    }
    fn on_result(&self, result: &DetectionResult) {
        self.push(Event::Result(result.clone()));
    }
    fn on_loading_changed(&self, active: bool) {
        self.push(Event::Loading(active));
    }
    fn on_remote_track(&self, track: &RemoteTrack) {
        self.push(Event::Track(track.id.clone()));
    }
}

/// A tiny valid PNG.
pub fn png_frame() -> Bytes {
    let mut out = Cursor::new(Vec::new());
    Bitmap::new(4, 4)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    Bytes::from(out.into_inner())
}

/// Push channel that replays `(delay, payload)` pairs, then either closes
/// or stays silent.
pub struct ScriptedFrames {
    script: Vec<(Duration, Bytes)>,
    close_at_end: bool,
    stall_open: bool,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedFrames {
    pub fn new(script: Vec<(Duration, Bytes)>, close_at_end: bool) -> Self {
        Self {
            script,
            close_at_end,
            stall_open: false,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `count` frames spaced `every` apart, channel kept open afterwards.
    pub fn steady(count: usize, every: Duration) -> Self {
        Self::new(vec![(every, png_frame()); count], false)
    }

    pub fn silent() -> Self {
        Self::new(Vec::new(), false)
    }

    /// A server that accepts the connection but never completes the open.
    pub fn unreachable() -> Self {
        Self {
            stall_open: true,
            ..Self::silent()
        }
    }
}

#[async_trait]
impl FrameChannelConnector for ScriptedFrames {
    async fn open(&self) -> Result<Box<dyn FrameChannel>, SessionError> {
        if self.stall_open {
            std::future::pending::<()>().await;
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedChannel {
            script: self.script.clone().into(),
            close_at_end: self.close_at_end,
            closed: self.closed.clone(),
        }))
    }
}

struct ScriptedChannel {
    script: VecDeque<(Duration, Bytes)>,
    close_at_end: bool,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameChannel for ScriptedChannel {
    async fn next_frame(&mut self) -> Result<Option<Bytes>, SessionError> {
        match self.script.pop_front() {
            Some((delay, payload)) => {
                tokio::time::sleep(delay).await;
                Ok(Some(payload))
            }
            None if self.close_at_end => Ok(None),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeCamera {
    stopped: Arc<AtomicBool>,
}

impl CaptureDevice for FakeCamera {
    fn tracks(&self) -> Vec<LocalTrack> {
        Vec::new()
    }
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub deny: bool,
    pub acquired: AtomicUsize,
    pub stopped: Arc<AtomicBool>,
}

impl FakeMedia {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MediaProvider for FakeMedia {
    async fn acquire(&self, camera_id: &str) -> Result<MediaSource, SessionError> {
        if self.deny {
            return Err(SessionError::MediaAcquisitionError(
                "permission denied".into(),
            ));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MediaSource::new(
            camera_id,
            Box::new(FakeCamera {
                stopped: self.stopped.clone(),
            }),
        ))
    }
}

#[derive(Default)]
pub struct FakeLink {
    pub closed: AtomicBool,
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(&self) -> Result<String, SessionError> {
        Ok("v=0 offer".into())
    }
    async fn apply_answer(&self, _: &AnswerResponse) -> Result<(), SessionError> {
        Ok(())
    }
    async fn close(&self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out one [`FakeLink`] and keeping its event sender so a
/// test can play the remote side.
#[derive(Default)]
pub struct FakeConnector {
    pub connects: AtomicUsize,
    pub with_tracks: Mutex<Option<usize>>,
    pub link: Arc<FakeLink>,
    events: Mutex<Option<UnboundedSender<PeerEvent>>>,
}

impl FakeConnector {
    pub fn emit(&self, event: PeerEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn emit_track(&self, id: &str) {
        self.emit(PeerEvent::RemoteTrack(RemoteTrack {
            id: id.into(),
            stream_id: "annotated".into(),
            kind: TrackKind::Video,
            track: None,
        }));
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        tracks: Vec<LocalTrack>,
        events: UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerLink>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.with_tracks.lock().unwrap() = Some(tracks.len());
        *self.events.lock().unwrap() = Some(events);
        Ok(self.link.clone())
    }
}

#[derive(Default)]
pub struct FakeSignaling {
    pub reject: bool,
    pub silent: bool,
    pub offers: Mutex<Vec<OfferRequest>>,
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn negotiate(&self, offer: &OfferRequest) -> Result<AnswerResponse, SessionError> {
        self.offers.lock().unwrap().push(offer.clone());
        if self.silent {
            std::future::pending::<()>().await;
        }
        if self.reject {
            return Err(SessionError::NegotiationError("HTTP 500".into()));
        }
        Ok(AnswerResponse {
            sdp: "v=0 answer".into(),
            r#type: "answer".into(),
        })
    }
}

/// Detection endpoint answering every request the same way after `delay`.
pub struct FakeUpload {
    pub delay: Duration,
    pub response: Result<UploadResponse, SessionError>,
    pub received: Mutex<Vec<String>>,
}

impl FakeUpload {
    pub fn answering(status: u16, content_type: &str, body: &'static [u8]) -> Self {
        Self {
            delay: Duration::from_millis(200),
            response: Ok(UploadResponse {
                status,
                content_type: Some(content_type.into()),
                body: Bytes::from_static(body),
            }),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn broken() -> Self {
        Self {
            delay: Duration::from_millis(200),
            response: Err(SessionError::UploadTransportError(
                "connection refused".into(),
            )),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl UploadTransport for FakeUpload {
    async fn upload(&self, file: &UploadFile) -> Result<UploadResponse, SessionError> {
        self.received.lock().unwrap().push(file.name.clone());
        tokio::time::sleep(self.delay).await;
        self.response.clone()
    }
}

pub struct Harness {
    pub coordinator: SessionCoordinator,
    pub renderer: Arc<RecordingRenderer>,
    pub frames: Arc<ScriptedFrames>,
    pub media: Arc<FakeMedia>,
    pub peers: Arc<FakeConnector>,
    pub signaling: Arc<FakeSignaling>,
    pub uploads: Arc<FakeUpload>,
}

pub struct HarnessBuilder {
    config: ClientConfig,
    frames: ScriptedFrames,
    media: FakeMedia,
    signaling: FakeSignaling,
    uploads: FakeUpload,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            frames: ScriptedFrames::silent(),
            media: FakeMedia::default(),
            signaling: FakeSignaling::default(),
            uploads: FakeUpload::answering(200, "image/png", b"png"),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn frames(mut self, frames: ScriptedFrames) -> Self {
        self.frames = frames;
        self
    }

    pub fn media(mut self, media: FakeMedia) -> Self {
        self.media = media;
        self
    }

    pub fn signaling(mut self, signaling: FakeSignaling) -> Self {
        self.signaling = signaling;
        self
    }

    pub fn uploads(mut self, uploads: FakeUpload) -> Self {
        self.uploads = uploads;
        self
    }

    pub fn build(self) -> Harness {
        let renderer = Arc::new(RecordingRenderer::default());
        let frames = Arc::new(self.frames);
        let media = Arc::new(self.media);
        let peers = Arc::new(FakeConnector::default());
        let signaling = Arc::new(self.signaling);
        let uploads = Arc::new(self.uploads);

        let deps = Collaborators {
            renderer: renderer.clone(),
            frames: frames.clone(),
            media: media.clone(),
            peers: peers.clone(),
            signaling: signaling.clone(),
            uploads: uploads.clone(),
        };
        Harness {
            coordinator: SessionCoordinator::new(self.config, deps),
            renderer,
            frames,
            media,
            peers,
            signaling,
            uploads,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::new().build()
}

/// Lets spawned drivers run; under a paused clock this also advances time.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
