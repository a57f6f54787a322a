//! Generation service clients.
//!
//! - [`ChatStreamClient`]: streaming chat completion (server-sent events)
//! - [`ImageClient`]: image generation returning base64 JSON
//! - [`SpeechClient`]: text-to-speech returning raw audio
//!
//! All requests go through [`send_with_retry`], which backs off on
//! throttling and gateway statuses.

pub mod chat;
pub mod error;
pub mod image;
pub mod retry;
pub mod speech;
pub mod sse;

pub use chat::{story_prompt, ChatConfig, ChatStreamClient};
pub use error::{ProviderError, ProviderResult};
pub use image::{ImageClient, ImageConfig};
pub use retry::{is_retryable_status, send_with_retry, RetryConfig};
pub use speech::{SpeechClient, SpeechConfig};
pub use sse::{SseDecoder, SseEvent};

pub(crate) fn required_env(name: &str) -> ProviderResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::config_error(format!("{} must be set", name)))
}
