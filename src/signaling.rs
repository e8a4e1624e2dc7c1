use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::error::SessionError;
use crate::peer::types::{AnswerResponse, OfferRequest};

/// Offer/answer exchange with the server.
#[async_trait]
pub trait Signaling: Send + Sync {
    async fn negotiate(&self, offer: &OfferRequest) -> Result<AnswerResponse, SessionError>;
}

/// Posts the offer as JSON and reads the answer from the response body.
pub struct HttpSignaling {
    client: reqwest::Client,
    url: Url,
}

impl HttpSignaling {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn negotiate(&self, offer: &OfferRequest) -> Result<AnswerResponse, SessionError> {
        info!(url = %self.url, camera = ?offer.camera, sdp_len = offer.sdp.len(), "sending offer");
        let response = self
            .client
            .post(self.url.clone())
            .json(offer)
            .send()
            .await
            .map_err(|e| SessionError::NegotiationError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::NegotiationError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SessionError::NegotiationError(e.to_string()))?;
        let answer: AnswerResponse = serde_json::from_slice(&body)
            .map_err(|e| SessionError::NegotiationError(format!("bad answer: {e}")))?;
        if answer.r#type != "answer" {
            return Err(SessionError::NegotiationError(format!(
                "expected an answer, got {:?}",
                answer.r#type
            )));
        }
        debug!(sdp_len = answer.sdp.len(), "answer received");
        Ok(answer)
    }
}
