//! Retrying request execution with exponential backoff.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            operation_name: "request".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Statuses that indicate throttling or a transient gateway failure.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Send the request produced by `build`, retrying retryable statuses.
///
/// Any other non-2xx status fails immediately with the response body.
/// Transport errors are not retried.
pub async fn send_with_retry<F>(config: &RetryConfig, build: F) -> ProviderResult<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;

    loop {
        let response = build().send().await?;
        let status = response.status();

        if status.is_success() {
            if attempt > 0 {
                debug!(
                    "{} succeeded after {} retries",
                    config.operation_name, attempt
                );
            }
            return Ok(response);
        }

        if is_retryable_status(status) {
            if attempt < config.max_retries {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation = %config.operation_name,
                    status = status.as_u16(),
                    attempt = attempt,
                    "Request throttled, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(ProviderError::RetriesExhausted {
                status: status.as_u16(),
                attempts: attempt + 1,
            });
        }

        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast() -> RetryConfig {
        RetryConfig::new("test").with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [408u16, 429, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 404, 500] {
            assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gen"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gen"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/gen", server.uri());
        let response = tokio_test::assert_ok!(send_with_retry(&fast(), || client.post(&url)).await);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/gen", server.uri());
        let err = tokio_test::assert_err!(send_with_retry(&fast(), || client.post(&url)).await);
        assert!(matches!(
            err,
            ProviderError::RetriesExhausted {
                status: 429,
                attempts: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/gen", server.uri());
        let err = send_with_retry(&fast(), || client.post(&url)).await.unwrap_err();
        match err {
            ProviderError::Api { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad prompt");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
