//! Streaming chat completion client for story scripts.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};
use crate::retry::{send_with_retry, RetryConfig};
use crate::sse::{SseDecoder, SseEvent};
use crate::required_env;

/// Chat completion endpoint settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

impl ChatConfig {
    /// Load from `GPT_API_URL`, `GPT_API_KEY` and `GPT_MODEL`.
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            api_url: required_env("GPT_API_URL")?,
            api_key: required_env("GPT_API_KEY")?,
            model: required_env("GPT_MODEL")?,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    stream: bool,
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// System prompt asking for a story with bracketed scenery descriptions.
pub fn story_prompt(topic: &str, words_per_story: u32) -> String {
    format!(
        "Write a story on the topic: {topic}. \
         The start of the story should be a short, quick description of the scenery, \
         written in square brackets.\n\
         Example: [White castle with a cloudy sky]\n\
         The square bracket descriptions:\n\
         - Should not contain any names\n\
         - Should be short (at most one sentence)\n\
         - Should be used at most 4 times per story\n\
         - Should only be used when the scenery changes drastically\n\
         - Should not be part of the storytelling, like stage directions in a play\n\
         The story should be about {words_per_story} words long."
    )
}

/// Extract the content delta from one `data:` payload.
fn chunk_content(payload: &str) -> ProviderResult<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| ProviderError::decode(format!("invalid stream chunk: {}", e)))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

struct StreamState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<ProviderResult<String>>,
    done: bool,
}

impl<S> StreamState<S> {
    /// Queue the tokens carried by `events`; stop at `[DONE]` or the first bad chunk.
    fn absorb(&mut self, events: impl IntoIterator<Item = SseEvent>) {
        for event in events {
            if self.done {
                return;
            }
            match event {
                SseEvent::Done => self.done = true,
                SseEvent::Data(payload) => match chunk_content(&payload) {
                    Ok(Some(token)) => self.pending.push_back(Ok(token)),
                    Ok(None) => {}
                    Err(e) => {
                        self.pending.push_back(Err(e));
                        self.done = true;
                    }
                },
            }
        }
    }
}

/// Client for a chat completion API in streaming mode.
#[derive(Clone)]
pub struct ChatStreamClient {
    config: ChatConfig,
    client: Client,
    retry: RetryConfig,
}

impl ChatStreamClient {
    pub fn new(config: ChatConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config,
            client,
            retry: RetryConfig::new("chat_completion"),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Start generating a story and stream its content tokens.
    ///
    /// The stream ends at `[DONE]` or when the body ends. A transport or
    /// decode failure is yielded once as `Err` and ends the stream.
    pub async fn stream_story(
        &self,
        topic: &str,
        words_per_story: u32,
    ) -> ProviderResult<impl Stream<Item = ProviderResult<String>> + Send + 'static> {
        let request = ChatRequest {
            stream: true,
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "system",
                content: story_prompt(topic, words_per_story),
            }],
        };

        info!(model = %self.config.model, "Requesting story stream");

        let response = send_with_retry(&self.retry, || {
            self.client
                .post(&self.config.api_url)
                .bearer_auth(&self.config.api_key)
                .header("Accept", "text/event-stream")
                .json(&request)
        })
        .await?;

        let state = StreamState {
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }
                match state.body.next().await {
                    Some(Ok(chunk)) => {
                        let events = state.decoder.push(&chunk);
                        state.absorb(events);
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        state.pending.push_back(Err(ProviderError::Http(e)));
                    }
                    None => {
                        debug!("Story stream body ended");
                        let tail = state.decoder.finish();
                        state.absorb(tail);
                        state.done = true;
                    }
                }
            }
        }))
    }
}
