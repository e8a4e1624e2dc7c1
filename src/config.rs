use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Deserialize;
use url::Url;

use crate::error::SessionError;
use crate::peer::types::{PeerMode, ServerConfig};

// Logging can only be switched off in release builds

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

#[cfg(debug_assertions)]
pub mod dev {
    // Set to false to silence logging in a debug build.
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// ========== DEFAULTS ==========

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Wait before a disconnected peer connection is declared lost.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Public STUN servers used when none are configured.
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// How the annotated feed is pushed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamTransport {
    /// Binary frames over a WebSocket.
    WebSocket { path: String },
    /// `multipart/x-mixed-replace` JPEG feed over HTTP.
    Mjpeg { path: String },
}

impl Default for StreamTransport {
    fn default() -> Self {
        StreamTransport::WebSocket { path: "/ws".into() }
    }
}

/// Client settings: where the server lives and how long to wait for it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub stream: StreamTransport,
    pub offer_path: String,
    pub detect_path: String,
    pub peer_mode: PeerMode,
    pub ice_servers: Option<Vec<ServerConfig>>,
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    #[serde(with = "secs")]
    pub negotiation_timeout: Duration,
    #[serde(with = "secs")]
    pub upload_timeout: Duration,
    #[serde(with = "secs")]
    pub grace_period: Duration,
    /// When set, video results are also saved here as `annotated.mp4`.
    pub download_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            stream: StreamTransport::default(),
            offer_path: "/offer".into(),
            detect_path: "/detect".into(),
            peer_mode: PeerMode::default(),
            ice_servers: None,
            connect_timeout: Duration::from_secs(10),
            negotiation_timeout: Duration::from_secs(15),
            upload_timeout: Duration::from_secs(300),
            grace_period: GRACE_PERIOD,
            download_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, SessionError> {
        let config: ClientConfig =
            toml::from_str(raw).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        Url::parse(&self.server_url)
            .map_err(|e| SessionError::Config(format!("server_url: {e}")))?;

        for server in self.ice_servers.iter().flatten() {
            if server.url.is_empty() {
                return Err(SessionError::Config(format!(
                    "ICE server {} has an empty url",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(SessionError::Config(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    /// Configured ICE servers, or the public defaults.
    pub fn ice_servers(&self) -> Vec<ServerConfig> {
        self.ice_servers
            .clone()
            .unwrap_or_else(|| DEFAULT_ICE_SERVERS.clone())
    }

    /// Absolute HTTP URL for `path` on the server.
    pub fn http_url(&self, path: &str) -> Result<Url, SessionError> {
        Url::parse(&self.server_url)
            .and_then(|base| base.join(path))
            .map_err(|e| SessionError::Config(format!("bad url for {path}: {e}")))
    }

    /// Same as [`http_url`](Self::http_url) with the scheme switched to ws/wss.
    pub fn ws_url(&self, path: &str) -> Result<Url, SessionError> {
        let mut url = self.http_url(path)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| SessionError::Config(format!("cannot use {scheme} for {url}")))?;
        Ok(url)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a positive number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
