//! Text-to-speech client.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::required_env;
use crate::retry::{send_with_retry, RetryConfig};

/// Speech synthesis endpoint settings.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Base URL; the voice id is appended as the last path segment
    pub api_url: String,
    pub api_key: String,
    pub model_id: String,
    pub stability: f64,
    pub similarity_boost: f64,
}

impl SpeechConfig {
    /// Load from the `ELEVEN_LABS_*` variables.
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            api_url: required_env("ELEVEN_LABS_API_URL")?,
            api_key: required_env("ELEVEN_LABS_API_KEY")?,
            model_id: required_env("ELEVEN_LABS_MODEL_ID")?,
            stability: parse_ratio("ELEVEN_LABS_STABILITY")?,
            similarity_boost: parse_ratio("ELEVEN_LABS_SIMILARITY_BOOST")?,
        })
    }
}

fn parse_ratio(name: &str) -> ProviderResult<f64> {
    required_env(name)?
        .parse()
        .map_err(|_| ProviderError::config_error(format!("{} must be a number", name)))
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f64,
    similarity_boost: f64,
}

#[derive(Clone)]
pub struct SpeechClient {
    config: SpeechConfig,
    client: Client,
    retry: RetryConfig,
}

impl SpeechClient {
    pub fn new(config: SpeechConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            config,
            client,
            retry: RetryConfig::new("speech_generation"),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Narrate `text` with `voice_id`, returning mpeg audio bytes.
    pub async fn generate(&self, text: &str, voice_id: &str) -> ProviderResult<Vec<u8>> {
        let url = format!("{}/{}", self.config.api_url.trim_end_matches('/'), voice_id);
        let request = SpeechRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        let response = send_with_retry(&self.retry, || {
            self.client
                .post(&url)
                .header("Accept", "audio/mpeg")
                .header("xi-api-key", &self.config.api_key)
                .json(&request)
        })
        .await?;

        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), voice_id = voice_id, "Generated speech");
        Ok(bytes.to_vec())
    }
}
