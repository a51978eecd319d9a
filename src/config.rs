use crate::session::{OutputFormat, SpeechConfig};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub speech: SpeechSettings,
    pub audio: AudioSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Where and how to reach the recognition service
#[derive(Debug, Deserialize)]
pub struct SpeechSettings {
    /// Direct endpoint (ws://, wss:// or nats://); wins over `region`
    pub endpoint: Option<String>,
    /// Managed-service region
    pub region: Option<String>,
    pub key: String,
    pub output_format: OutputFormat,
    pub language: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub keepalive_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct AudioSettings {
    pub frame_duration_ms: u32,
}

impl Config {
    /// Load `path` (any format the config crate knows, optional) and
    /// `TRANSCRIBER__*` environment overrides, e.g. `TRANSCRIBER__SPEECH__KEY`
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "conversation-transcriber")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 3000)?
            .set_default("speech.key", "")?
            .set_default("speech.output_format", "simple")?
            .set_default("speech.language", "en-US")?
            .set_default("speech.connect_timeout_secs", 10)?
            .set_default("speech.request_timeout_secs", 30)?
            .set_default("speech.keepalive_secs", 15)?
            .set_default("audio.frame_duration_ms", 100)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TRANSCRIBER").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Build the transcriber configuration these settings describe
    pub fn speech_config(&self) -> Result<SpeechConfig> {
        let speech = &self.speech;

        let config = match (&speech.endpoint, &speech.region) {
            (Some(endpoint), _) => SpeechConfig::from_endpoint(endpoint.as_str(), speech.key.as_str())
                .with_context(|| format!("Invalid speech endpoint {}", endpoint))?,
            (None, Some(region)) => SpeechConfig::from_subscription(speech.key.as_str(), region.as_str())
                .context("Invalid speech subscription")?,
            (None, None) => bail!("Either speech.endpoint or speech.region must be configured"),
        };

        Ok(config
            .with_output_format(speech.output_format)
            .with_language(speech.language.as_str())
            .context("Invalid speech.language")?
            .with_connect_timeout(Duration::from_secs(speech.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(speech.request_timeout_secs))
            .with_keepalive_interval(Duration::from_secs(speech.keepalive_secs))
            .with_frame_duration_ms(self.audio.frame_duration_ms))
    }
}
