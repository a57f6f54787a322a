//! Provider error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Service still returned {status} after {attempts} attempts")]
    RetriesExhausted { status: u16, attempts: u32 },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } | ProviderError::RetriesExhausted { status, .. } => {
                Some(*status)
            }
            ProviderError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
