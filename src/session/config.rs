use super::validation::validate_language;
use crate::connection::{ConnectionTimeouts, NatsTransport, Transport, WebSocketTransport};
use crate::error::{Result, TranscriberError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::Uri;

/// Host suffix of the managed service, prefixed by the region
pub const MANAGED_HOST_SUFFIX: &str = "stt.speech.microsoft.com";

/// Multi-channel conversation recognition path on the managed service
pub const CONVERSATION_PATH: &str = "/speech/recognition/multiaudio";

/// Shortest keep-alive period; a zero period is not a valid timer
const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(100);

/// Detail level of recognition results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Text only
    #[default]
    Simple,
    /// Text plus confidence and per-word timing
    Detailed,
}

impl FromStr for OutputFormat {
    type Err = TranscriberError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "detailed" => Ok(Self::Detailed),
            other => Err(TranscriberError::invalid_argument(
                "output format",
                format!("'{}' is not simple or detailed", other),
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::Detailed => f.write_str("detailed"),
        }
    }
}

/// Deployment target of the recognition service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Managed service addressed by region
    Subscription { key: String, region: String },
    /// Direct endpoint (ws://, wss:// or nats://)
    Uri { uri: String, key: String },
}

impl Endpoint {
    pub fn url(&self) -> String {
        match self {
            Self::Subscription { region, .. } => {
                format!("wss://{}.{}{}", region, MANAGED_HOST_SUFFIX, CONVERSATION_PATH)
            }
            Self::Uri { uri, .. } => uri.clone(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Subscription { key, .. } | Self::Uri { key, .. } => key,
        }
    }
}

/// Configuration for conversation transcribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Service endpoint and credentials
    pub endpoint: Endpoint,

    /// Result detail level
    pub output_format: OutputFormat,

    /// Recognition language (BCP-47)
    pub language: String,

    /// Bound on opening the connection and completing the handshake
    pub connect_timeout: Duration,

    /// Bound on each acknowledged request (start, stop, roster changes)
    pub request_timeout: Duration,

    /// Interval between keep-alive pings
    pub keepalive_interval: Duration,

    /// Duration of each audio frame sent to the service
    pub frame_duration_ms: u32,
}

impl SpeechConfig {
    fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            output_format: OutputFormat::Simple,
            language: "en-US".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
            frame_duration_ms: 100, // 100ms frames
        }
    }

    /// Managed service subscription
    pub fn from_subscription(key: impl Into<String>, region: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let region = region.into();

        if key.trim().is_empty() {
            return Err(TranscriberError::invalid_argument("subscription key", "must not be empty"));
        }
        if region.is_empty() || !region.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(TranscriberError::invalid_argument(
                "region",
                format!("'{}' is not a region name", region),
            ));
        }

        Ok(Self::with_endpoint(Endpoint::Subscription { key, region }))
    }

    /// Direct endpoint; the scheme selects the transport
    pub fn from_endpoint(uri: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        let parsed: Uri = uri
            .parse()
            .map_err(|e| TranscriberError::invalid_argument("endpoint", format!("{}: {}", uri, e)))?;

        match parsed.scheme_str() {
            Some("ws") | Some("wss") | Some("nats") => {}
            other => {
                return Err(TranscriberError::invalid_argument(
                    "endpoint",
                    format!("unsupported scheme {:?} in {}", other, uri),
                ))
            }
        }

        Ok(Self::with_endpoint(Endpoint::Uri {
            uri,
            key: key.into(),
        }))
    }

    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Result<Self> {
        let language = language.into();
        validate_language(&language)?;
        self.language = language;
        Ok(self)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval.max(MIN_KEEPALIVE_INTERVAL);
        self
    }

    pub fn with_frame_duration_ms(mut self, frame_duration_ms: u32) -> Self {
        self.frame_duration_ms = frame_duration_ms.max(10);
        self
    }

    /// Transport for this endpoint
    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        let url = self.endpoint.url();
        let key = Some(self.endpoint.key().to_string()).filter(|k| !k.is_empty());

        if url.starts_with("nats://") {
            Ok(Arc::new(NatsTransport::new(url, key)))
        } else if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(Arc::new(WebSocketTransport::new(url, key)))
        } else {
            Err(TranscriberError::config(format!("no transport for {}", url)))
        }
    }

    pub(crate) fn timeouts(&self) -> ConnectionTimeouts {
        ConnectionTimeouts {
            connect: self.connect_timeout,
            request: self.request_timeout,
            keepalive: self.keepalive_interval.max(MIN_KEEPALIVE_INTERVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_resolves_regional_endpoint() {
        let config = SpeechConfig::from_subscription("key", "westus").unwrap();
        assert_eq!(
            config.endpoint.url(),
            "wss://westus.stt.speech.microsoft.com/speech/recognition/multiaudio"
        );
        assert_eq!(config.endpoint.key(), "key");
        assert_eq!(config.output_format, OutputFormat::Simple);
    }

    #[test]
    fn test_subscription_rejects_blank_key_and_bad_region() {
        assert!(SpeechConfig::from_subscription("", "westus").is_err());
        assert!(SpeechConfig::from_subscription("key", "west us").is_err());
    }

    #[test]
    fn test_endpoint_scheme_selects_transport() {
        let ws = SpeechConfig::from_endpoint("wss://example.com/speech/recognition/multiaudio?", "k").unwrap();
        assert_eq!(ws.transport().unwrap().name(), "websocket");

        let nats = SpeechConfig::from_endpoint("nats://localhost:4222", "").unwrap();
        assert_eq!(nats.transport().unwrap().name(), "nats");

        let http = SpeechConfig::from_endpoint("https://example.com", "k");
        assert!(matches!(http, Err(TranscriberError::InvalidArgument { .. })));
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("Detailed".parse::<OutputFormat>().unwrap(), OutputFormat::Detailed);
        assert_eq!("simple".parse::<OutputFormat>().unwrap(), OutputFormat::Simple);
        assert!("verbose".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_zero_keepalive_interval_is_clamped() {
        let config = SpeechConfig::from_subscription("key", "westus")
            .unwrap()
            .with_keepalive_interval(Duration::ZERO);
        assert_eq!(config.keepalive_interval, MIN_KEEPALIVE_INTERVAL);

        let mut config = config;
        config.keepalive_interval = Duration::ZERO;
        assert_eq!(config.timeouts().keepalive, MIN_KEEPALIVE_INTERVAL);
    }

    #[test]
    fn test_language_is_validated() {
        let config = SpeechConfig::from_subscription("key", "westus").unwrap();
        assert!(config.clone().with_language("").is_err());
        assert_eq!(config.with_language("zh-CN").unwrap().language, "zh-CN");
    }
}
