pub mod connection;
pub mod media;
pub mod state;
pub mod types;

pub use connection::{PeerConnector, PeerEvent, PeerLink, WebRtcConnector};
pub use media::{CaptureDevice, LocalTrack, MediaProvider, MediaSource, SampleTrackProvider};
pub use state::{Followup, PeerSession};
pub use types::{AnswerResponse, OfferRequest, PeerDescriptor, PeerMode, ServerConfig};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::coordinator::SessionContext;
use crate::error::SessionError;
use connection::close_link_later;

/// Runs one peer session until it is stopped, fails, or the connection ends.
pub(crate) async fn drive(ctx: SessionContext, shutdown: Arc<Notify>) {
    tokio::select! {
        _ = shutdown.notified() => debug!(session = %ctx.id(), "peer driver stopped"),
        _ = run(&ctx) => debug!(session = %ctx.id(), "peer driver finished"),
    }
}

async fn run(ctx: &SessionContext) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    match establish(ctx, events_tx).await {
        Ok(true) => watch(ctx, events_rx).await,
        Ok(false) => {}
        Err(error) => {
            ctx.with_peer(|session, out| session.fail(error, out));
        }
    }
}

/// Steps 1–5: camera, connection, offer, answer. `Ok(false)` means the
/// session went away while we were waiting.
async fn establish(
    ctx: &SessionContext,
    events: UnboundedSender<PeerEvent>,
) -> Result<bool, SessionError> {
    let config = ctx.config();
    let deps = ctx.deps();
    let Some((mode, camera)) =
        ctx.with_peer(|session, _| (session.mode(), session.camera_id().to_owned()))
    else {
        return Ok(false);
    };

    let tracks = match mode {
        PeerMode::ReceiveOnly => Vec::new(),
        PeerMode::SendReceive => {
            let media = timeout(config.connect_timeout, deps.media.acquire(&camera))
                .await
                .map_err(|_| SessionError::Timeout("camera"))??;
            // a stopped session drops the closure, and the camera with it
            match ctx.with_peer(move |session, _| session.on_media_ready(media)) {
                Some(tracks) => tracks?,
                None => return Ok(false),
            }
        }
    };

    let link = timeout(config.connect_timeout, deps.peers.connect(tracks, events))
        .await
        .map_err(|_| SessionError::Timeout("peer connection"))??;
    let stored = link.clone();
    match ctx.with_peer(move |session, _| session.on_link_created(stored)) {
        Some(result) => result?,
        None => {
            close_link_later(link);
            return Ok(false);
        }
    }

    timeout(config.negotiation_timeout, async {
        let sdp = link.create_offer().await?;
        let Some(offer) = ctx.with_peer(|session, out| session.begin_offer(sdp, out)) else {
            return Ok(false);
        };
        let offer = offer?;

        let answer = deps.signaling.negotiate(&offer).await?;
        link.apply_answer(&answer).await?;
        match ctx.with_peer(|session, _| session.on_answer(&answer)) {
            Some(result) => result.map(|_| true),
            None => Ok(false),
        }
    })
    .await
    .map_err(|_| SessionError::Timeout("negotiation"))?
}

/// Step 5 onwards: feed connection events to the session, running the
/// disconnect grace timer.
async fn watch(ctx: &SessionContext, mut events: UnboundedReceiver<PeerEvent>) {
    let grace_period: Duration = ctx.config().grace_period;
    let grace = sleep(grace_period);
    tokio::pin!(grace);
    let mut grace_armed = false;

    loop {
        tokio::select! {
            _ = &mut grace, if grace_armed => {
                grace_armed = false;
                if ctx.with_peer(|session, out| session.on_grace_expired(out)).is_none() {
                    return;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    ctx.with_peer(|session, out| {
                        session.fail(SessionError::ChannelError("peer connection dropped".into()), out)
                    });
                    return;
                };
                match ctx.with_peer(|session, out| session.on_event(event, out)) {
                    None | Some(Followup::Finished) => return,
                    Some(Followup::StartGrace) => {
                        grace.as_mut().reset(Instant::now() + grace_period);
                        grace_armed = true;
                    }
                    Some(Followup::CancelGrace) => grace_armed = false,
                    Some(Followup::Nothing) => {}
                }
            }
        }
    }
}
