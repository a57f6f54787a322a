//! Story events via Redis Pub/Sub.

use std::pin::Pin;

use futures_util::Stream;
use redis::AsyncCommands;
use tracing::debug;

use storyreel_models::{PipelineEvent, StoryId};

use crate::error::CacheResult;

/// Channel for publishing/subscribing to story events.
#[derive(Clone)]
pub struct EventChannel {
    client: redis::Client,
}

impl EventChannel {
    pub fn new(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a story.
    pub fn channel_name(story_id: &StoryId) -> String {
        format!("story:{}:events", story_id)
    }

    /// Publish an event on its story's channel.
    pub async fn publish(&self, event: &PipelineEvent) -> CacheResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(event.story_id());
        let payload = serde_json::to_string(event)?;

        debug!("Publishing {} event to {}", event.event_type().as_str(), channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Subscribe to a story's events.
    /// Payloads that fail to decode are skipped.
    pub async fn subscribe(
        &self,
        story_id: &StoryId,
    ) -> CacheResult<Pin<Box<dyn Stream<Item = PipelineEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(story_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            decode_event(&payload)
        });

        Ok(Box::pin(stream))
    }
}

fn decode_event(payload: &str) -> Option<PipelineEvent> {
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping undecodable story event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(
            EventChannel::channel_name(&StoryId::from("s-9")),
            "story:s-9:events"
        );
    }

    #[test]
    fn test_decode_event_skips_garbage() {
        let event = PipelineEvent::generation_complete(&StoryId::from("s-9"));
        let payload = serde_json::to_string(&event).unwrap();
        assert_eq!(decode_event(&payload), Some(event));
        assert_eq!(decode_event("{\"type\":\"unknown\"}"), None);
        assert_eq!(decode_event("ping"), None);
    }
}
