use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::SessionError;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// A running capture that feeds one or more local tracks.
pub trait CaptureDevice: Send + Sync {
    fn tracks(&self) -> Vec<LocalTrack>;
    fn stop(&self);
}

/// Exclusive handle to a local camera. Released exactly once, on
/// [`release`](Self::release) or drop.
pub struct MediaSource {
    camera_id: String,
    device: Box<dyn CaptureDevice>,
    released: bool,
}

impl MediaSource {
    pub fn new(camera_id: impl Into<String>, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            camera_id: camera_id.into(),
            device,
            released: false,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn tracks(&self) -> Vec<LocalTrack> {
        if self.released {
            return Vec::new();
        }
        self.device.tracks()
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.device.stop();
        debug!(camera = %self.camera_id, "media source released");
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens capture devices by the identifier the user picked.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn acquire(&self, camera_id: &str) -> Result<MediaSource, SessionError>;
}

/// Provider exposing one VP8 sample track per opened camera. The encoder
/// that produces samples lives outside this crate and writes into
/// [`current_track`](Self::current_track).
pub struct SampleTrackProvider {
    cameras: Vec<String>,
    current: Arc<Mutex<Option<Arc<TrackLocalStaticSample>>>>,
}

impl SampleTrackProvider {
    pub fn new<I, S>(cameras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cameras: cameras.into_iter().map(Into::into).collect(),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn current_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.current.lock().ok().and_then(|slot| slot.clone())
    }
}

impl Default for SampleTrackProvider {
    fn default() -> Self {
        Self::new(["csi", "usb"])
    }
}

#[async_trait]
impl MediaProvider for SampleTrackProvider {
    async fn acquire(&self, camera_id: &str) -> Result<MediaSource, SessionError> {
        if !self.cameras.iter().any(|c| c == camera_id) {
            return Err(SessionError::MediaAcquisitionError(format!(
                "no camera named {camera_id:?}"
            )));
        }

        let mut slot = self
            .current
            .lock()
            .map_err(|_| SessionError::MediaAcquisitionError("capture state poisoned".into()))?;
        if slot.is_some() {
            return Err(SessionError::MediaAcquisitionError(
                "camera is already in use".into(),
            ));
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            format!("camera-{camera_id}"),
        ));
        *slot = Some(track.clone());
        info!(camera = camera_id, "camera opened");

        Ok(MediaSource::new(
            camera_id,
            Box::new(SampleCapture {
                track,
                current: self.current.clone(),
            }),
        ))
    }
}

struct SampleCapture {
    track: Arc<TrackLocalStaticSample>,
    current: Arc<Mutex<Option<Arc<TrackLocalStaticSample>>>>,
}

impl CaptureDevice for SampleCapture {
    fn tracks(&self) -> Vec<LocalTrack> {
        vec![self.track.clone() as LocalTrack]
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.current.lock() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDevice(Arc<AtomicUsize>);

    impl CaptureDevice for CountingDevice {
        fn tracks(&self) -> Vec<LocalTrack> {
            Vec::new()
        }
        fn stop(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn source_is_released_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut source = MediaSource::new("usb", Box::new(CountingDevice(stops.clone())));
        source.release();
        source.release();
        drop(source);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_an_unreleased_source_stops_the_device() {
        let stops = Arc::new(AtomicUsize::new(0));
        drop(MediaSource::new("csi", Box::new(CountingDevice(stops.clone()))));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sample_provider_owns_the_camera_exclusively() {
        let provider = SampleTrackProvider::default();

        let err = provider.acquire("thermal").await.err();
        assert!(matches!(err, Some(SessionError::MediaAcquisitionError(_))));

        let mut source = provider.acquire("usb").await.unwrap();
        assert_eq!(source.tracks().len(), 1);
        assert!(provider.current_track().is_some());
        assert!(provider.acquire("csi").await.is_err());

        source.release();
        assert!(provider.current_track().is_none());
        assert!(source.tracks().is_empty());
        assert!(provider.acquire("csi").await.is_ok());
    }
}
