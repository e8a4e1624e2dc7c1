pub mod channel;
pub mod mjpeg;
pub mod session;

pub use channel::{FrameChannel, FrameChannelConnector, WebSocketConnector};
pub use mjpeg::{MjpegConnector, MjpegParser};
pub use session::{decode_frame, StreamingSession};

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::coordinator::SessionContext;
use crate::error::SessionError;

/// Pumps the push channel into the session until stop, failure or close.
pub(crate) async fn drive(ctx: SessionContext, shutdown: Arc<Notify>) {
    let connector = ctx.deps().frames.clone();
    let opened = tokio::select! {
        _ = shutdown.notified() => return,
        opened = timeout(ctx.config().connect_timeout, connector.open()) => opened,
    };

    let mut channel = match opened {
        Ok(Ok(channel)) => channel,
        Ok(Err(error)) => {
            ctx.with_streaming(|session, out| session.fail(error, out));
            return;
        }
        Err(_) => {
            ctx.with_streaming(|session, out| {
                session.fail(SessionError::Timeout("channel open"), out)
            });
            return;
        }
    };

    if ctx
        .with_streaming(|session, out| session.on_open(out))
        .is_none()
    {
        channel.close().await;
        return;
    }

    loop {
        let next = tokio::select! {
            _ = shutdown.notified() => None,
            next = channel.next_frame() => Some(next),
        };
        let Some(next) = next else {
            debug!(session = %ctx.id(), "closing push channel");
            channel.close().await;
            return;
        };

        let arrived = Instant::now();
        match next {
            Ok(Some(payload)) => {
                let decoded = decode_frame(&payload);
                let rendered =
                    ctx.with_streaming(|session, out| session.on_frame(decoded, arrived, out));
                if rendered != Some(true) {
                    channel.close().await;
                    return;
                }
            }
            Ok(None) => {
                ctx.with_streaming(|session, out| session.on_closed(None, out));
                return;
            }
            Err(error) => {
                ctx.with_streaming(|session, out| session.on_closed(Some(error), out));
                channel.close().await;
                return;
            }
        }
    }
}
