//! Configuration for a chat session.
//!
//! [`SessionConfig`] is loaded from TOML with every field optional; missing
//! fields take the defaults below, which match a backend running locally on
//! port 8888.

use crate::error::{Result, SessionError};
use crate::transport::state::ReconnectPolicy;
use chatlink_protocol::ClassifyMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Top-level configuration for a chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base HTTP URL of the chat backend.
    pub server_url: String,
    /// Push channel URL. When `None`, derived from `server_url` by switching
    /// the scheme to `ws`/`wss` and using `push_path`.
    pub push_url: Option<String>,
    /// Path of the push channel endpoint (used only when `push_url` is unset).
    pub push_path: String,
    /// Path of the fallback chat endpoint.
    pub chat_path: String,
    /// Path of the model status endpoint.
    pub status_path: String,
    /// Model selected when the session starts.
    pub default_model: String,
    /// Push channel reconnection settings.
    pub reconnect: ReconnectConfig,
    /// Interval between WebSocket ping frames while the push channel is open.
    /// `None` disables keepalive pings. Written as `0` in TOML.
    #[serde(with = "interval_secs")]
    pub keepalive_interval_secs: Option<u64>,
    /// Interval between background status refreshes. `None` polls only at
    /// start, on demand and after a successful pull. Written as `0` in TOML.
    #[serde(with = "interval_secs")]
    pub status_poll_interval_secs: Option<u64>,
    /// Timeout for fallback and status requests. `None` leaves it to the
    /// network stack.
    pub request_timeout_secs: Option<u64>,
    /// Recognise plain-text pull announcements from older backends.
    ///
    /// Disable when the backend sends tagged frames, so that replies quoting
    /// the announcement wording are never mistaken for lifecycle events.
    pub legacy_sentinels: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8888".to_owned(),
            push_url: None,
            push_path: "/api/chat/ws".to_owned(),
            chat_path: "/api/chat".to_owned(),
            status_path: "/api/models/status".to_owned(),
            default_model: "llama3.1".to_owned(),
            reconnect: ReconnectConfig::default(),
            keepalive_interval_secs: Some(30),
            status_poll_interval_secs: Some(60),
            request_timeout_secs: None,
            legacy_sentinels: true,
        }
    }
}

/// Push channel reconnection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before reconnecting after the channel closes, in milliseconds.
    pub delay_ms: u64,
    /// When set, the delay doubles on each consecutive failure up to this
    /// cap. When `None`, every retry waits exactly `delay_ms`.
    pub backoff_max_ms: Option<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 3_000,
            backoff_max_ms: None,
        }
    }
}

/// Resolved backend URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Push channel (WebSocket) URL.
    pub push: Url,
    /// Fallback chat endpoint.
    pub chat: Url,
    /// Model status endpoint.
    pub status: Url,
}

impl SessionConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/chatlink/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("chatlink")
            .join("config.toml")
    }

    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.default_model.trim().is_empty() {
            return Err(SessionError::Config("default_model must not be empty".into()));
        }
        if self.reconnect.delay_ms == 0 {
            return Err(SessionError::Config(
                "reconnect.delay_ms must be greater than 0".into(),
            ));
        }
        if let Some(max) = self.reconnect.backoff_max_ms
            && max < self.reconnect.delay_ms
        {
            return Err(SessionError::Config(
                "reconnect.backoff_max_ms must be >= reconnect.delay_ms".into(),
            ));
        }
        for (name, value) in [
            ("keepalive_interval_secs", self.keepalive_interval_secs),
            ("status_poll_interval_secs", self.status_poll_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == Some(0) {
                return Err(SessionError::Config(format!(
                    "{name} must be greater than 0 when set"
                )));
            }
        }
        self.endpoints().map(|_| ())
    }

    /// Resolve the push, chat, and status URLs.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if a URL is malformed or uses the
    /// wrong scheme.
    pub fn endpoints(&self) -> Result<Endpoints> {
        let base = Url::parse(&self.server_url)
            .map_err(|e| SessionError::Config(format!("invalid server_url: {e}")))?;
        let push_scheme = match base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(SessionError::Config(format!(
                    "server_url must use http or https, not {other}"
                )));
            }
        };

        let join = |field: &str, path: &str| {
            base.join(path)
                .map_err(|e| SessionError::Config(format!("invalid {field}: {e}")))
        };

        let push = match self.push_url {
            Some(ref raw) => {
                let url = Url::parse(raw)
                    .map_err(|e| SessionError::Config(format!("invalid push_url: {e}")))?;
                if !matches!(url.scheme(), "ws" | "wss") {
                    return Err(SessionError::Config(format!(
                        "push_url must use ws or wss, not {}",
                        url.scheme()
                    )));
                }
                url
            }
            None => {
                let mut url = join("push_path", &self.push_path)?;
                url.set_scheme(push_scheme).map_err(|()| {
                    SessionError::Config(format!("cannot derive {push_scheme} URL from server_url"))
                })?;
                url
            }
        };

        Ok(Endpoints {
            push,
            chat: join("chat_path", &self.chat_path)?,
            status: join("status_path", &self.status_path)?,
        })
    }

    /// The reconnection policy described by [`ReconnectConfig`].
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_millis(self.reconnect.delay_ms);
        match self.reconnect.backoff_max_ms {
            Some(max) => ReconnectPolicy::Backoff {
                base: delay,
                max: Duration::from_millis(max),
            },
            None => ReconnectPolicy::Fixed(delay),
        }
    }

    /// How untagged inbound payloads are classified.
    pub fn classify_mode(&self) -> ClassifyMode {
        if self.legacy_sentinels {
            ClassifyMode::Legacy
        } else {
            ClassifyMode::TaggedOnly
        }
    }

    pub(crate) fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_secs.map(Duration::from_secs)
    }

    pub(crate) fn status_poll_interval(&self) -> Option<Duration> {
        self.status_poll_interval_secs.map(Duration::from_secs)
    }

    /// Build the HTTP client shared by the fallback channel and the status poller.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Http`] if the client cannot be constructed.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("chatlink/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder
            .build()
            .map_err(|e| SessionError::Http(format!("failed to build HTTP client: {e}")))
    }
}

/// Optional intervals stored as plain seconds, where `0` means off.
///
/// TOML has no null, so a disabled interval must survive a save as an
/// explicit value; an omitted key still falls back to the default.
mod interval_secs {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Option<u64>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.unwrap_or(0))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<u64>, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok((secs != 0).then_some(secs))
    }
}
