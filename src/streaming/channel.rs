use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::error::SessionError;

/// A server-to-client push channel of encoded frames.
#[async_trait]
pub trait FrameChannel: Send {
    /// Next frame payload; `Ok(None)` once the server has closed the channel.
    async fn next_frame(&mut self) -> Result<Option<Bytes>, SessionError>;
    async fn close(&mut self);
}

/// Opens push channels.
#[async_trait]
pub trait FrameChannelConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameChannel>, SessionError>;
}

pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl FrameChannelConnector for WebSocketConnector {
    async fn open(&self) -> Result<Box<dyn FrameChannel>, SessionError> {
        let (stream, response) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, status = %response.status(), "websocket open");
        Ok(Box::new(WebSocketChannel {
            stream,
            closed: false,
        }))
    }
}

pub struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl FrameChannel for WebSocketChannel {
    async fn next_frame(&mut self) -> Result<Option<Bytes>, SessionError> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed websocket");
                    self.closed = true;
                    return Ok(None);
                }
                // ping/pong are answered by tungstenite; text carries no frame
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.closed = true;
                    return Err(e.into());
                }
                None => {
                    self.closed = true;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close");
        }
    }
}
