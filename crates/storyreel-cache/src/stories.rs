//! Saved story records.

use redis::AsyncCommands;
use tracing::debug;

use storyreel_models::{StoryId, StoryRecord};

use crate::error::CacheResult;
use crate::segments::CacheConfig;

/// Stores one record per completed story and an index per owner.
#[derive(Clone)]
pub struct StoryStore {
    client: redis::Client,
}

impl StoryStore {
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client })
    }

    pub fn story_key(story_id: &StoryId) -> String {
        format!("story:{}", story_id)
    }

    /// Key of the list of an owner's story ids, oldest first.
    pub fn owner_index_key(owner_id: &str) -> String {
        format!("user:{}:stories", owner_id)
    }

    pub async fn save(&self, story: &StoryRecord) -> CacheResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = Self::story_key(&story.id);
        let payload = serde_json::to_string(story)?;

        redis::pipe()
            .atomic()
            .set(&key, payload)
            .ignore()
            .rpush(Self::owner_index_key(&story.owner_id), story.id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(key = %key, "Saved story record");
        Ok(())
    }

    pub async fn load(&self, story_id: &StoryId) -> CacheResult<Option<StoryRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::story_key(story_id)).await?;
        decode_story(payload)
    }
}

fn decode_story(payload: Option<String>) -> CacheResult<Option<StoryRecord>> {
    payload
        .map(|p| serde_json::from_str(&p))
        .transpose()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_models::StoryRequest;

    #[test]
    fn test_keys() {
        assert_eq!(StoryStore::story_key(&StoryId::from("s-1")), "story:s-1");
        assert_eq!(StoryStore::owner_index_key("u-1"), "user:u-1:stories");
    }

    #[test]
    fn test_decode_story() {
        let record = StoryRecord::new(&StoryRequest::new("owls", "v", "u-1"), 3);
        let payload = serde_json::to_string(&record).unwrap();

        assert_eq!(decode_story(Some(payload)).unwrap(), Some(record));
        assert_eq!(decode_story(None).unwrap(), None);
        assert!(decode_story(Some("{".to_string())).is_err());
    }
}
