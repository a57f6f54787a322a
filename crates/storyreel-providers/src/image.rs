//! Image generation client.

use std::time::Duration;

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::required_env;
use crate::retry::{send_with_retry, RetryConfig};

/// Image generation endpoint settings.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub api_url: String,
    pub api_key: String,
    pub size: String,
    pub model: String,
}

impl ImageConfig {
    /// Load from `DALLE_API_URL`, `DALLE_API_KEY`, `DALLE_SIZE` and `DALLE_MODEL`.
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            api_url: required_env("DALLE_API_URL")?,
            api_key: required_env("DALLE_API_KEY")?,
            size: required_env("DALLE_SIZE")?,
            model: required_env("DALLE_MODEL")?,
        })
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: String,
    model: &'a str,
    size: &'a str,
    n: u32,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: String,
}

#[derive(Clone)]
pub struct ImageClient {
    config: ImageConfig,
    client: Client,
    retry: RetryConfig,
}

impl ImageClient {
    pub fn new(config: ImageConfig) -> ProviderResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            config,
            client,
            retry: RetryConfig::new("image_generation"),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Render a scenery description and return the decoded image bytes.
    pub async fn generate(&self, description: &str) -> ProviderResult<Vec<u8>> {
        let request = ImageRequest {
            prompt: format!("{}, in a cartoon style", description),
            model: &self.config.model,
            size: &self.config.size,
            n: 1,
            response_format: "b64_json",
        };

        let response = send_with_retry(&self.retry, || {
            self.client
                .post(&self.config.api_url)
                .bearer_auth(&self.config.api_key)
                .json(&request)
        })
        .await?;

        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::decode(format!("invalid image response: {}", e)))?;

        let datum = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::decode("image response contained no data"))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(datum.b64_json.as_bytes())
            .map_err(|e| ProviderError::decode(format!("invalid base64 image: {}", e)))?;

        debug!(bytes = bytes.len(), "Generated image");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ImageClient {
        ImageClient::new(ImageConfig {
            api_url: format!("{}/v1/images/generations", server.uri()),
            api_key: "k".to_string(),
            size: "256x256".to_string(),
            model: "m".to_string(),
        })
        .unwrap()
        .with_retry(RetryConfig::new("test").with_base_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_decodes_first_image() {
        let server = MockServer::start().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake");
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"b64_json": encoded}]
            })))
            .mount(&server)
            .await;

        let bytes = client_for(&server).generate("A sunny meadow").await.unwrap();
        assert_eq!(bytes, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_empty_data_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).generate("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn test_request_body_carries_styled_prompt() {
        let server = MockServer::start().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"img");
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"b64_json": encoded}]
            })))
            .mount(&server)
            .await;

        client_for(&server).generate("A castle").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["prompt"], "A castle, in a cartoon style");
        assert_eq!(body["n"], 1);
        assert_eq!(body["response_format"], "b64_json");
        assert_eq!(body["size"], "256x256");
    }
}
