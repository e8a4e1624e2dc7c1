use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the client sends its own camera or only receives the server's feed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PeerMode {
    #[default]
    SendReceive,
    ReceiveOnly,
}

/// Body of the negotiation request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OfferRequest {
    pub sdp: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
}

impl OfferRequest {
    pub fn new(sdp: String, camera: Option<String>) -> Self {
        Self {
            sdp,
            r#type: "offer".into(),
            camera,
        }
    }
}

/// Body of a successful negotiation response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnswerResponse {
    pub sdp: String,
    pub r#type: String,
}

/// The offer/answer pair of one peer session.
#[derive(Debug, Clone)]
pub struct PeerDescriptor {
    pub id: String,
    pub local_offer: String,
    pub remote_answer: Option<String>,
    pub camera_id: String,
    pub created_at: DateTime<Utc>,
}

/// ICE server configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}
