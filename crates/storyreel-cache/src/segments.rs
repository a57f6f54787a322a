//! Segment metadata cache.

use redis::AsyncCommands;
use tracing::debug;

use storyreel_models::{SegmentId, SegmentWithMediaUrl, StoryId};

use crate::error::{CacheError, CacheResult};

/// Default time-to-live of a cached segment record (one day).
pub const DEFAULT_SEGMENT_TTL_SECS: u64 = 24 * 60 * 60;

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub segment_ttl_secs: u64,
}

impl CacheConfig {
    /// Load from `REDIS_URL` and `STORYREEL_SEGMENT_TTL_SECS`.
    pub fn from_env() -> CacheResult<Self> {
        let redis_url = std::env::var("REDIS_URL")
            .map_err(|_| CacheError::config_error("REDIS_URL not set"))?;
        let segment_ttl_secs = std::env::var("STORYREEL_SEGMENT_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SEGMENT_TTL_SECS);

        Ok(Self {
            redis_url,
            segment_ttl_secs,
        })
    }
}

/// Records persisted segments so a story can be replayed.
#[derive(Clone)]
pub struct SegmentCacheClient {
    client: redis::Client,
    ttl_secs: u64,
}

impl SegmentCacheClient {
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            ttl_secs: config.segment_ttl_secs,
        })
    }

    /// Key of a single segment record.
    pub fn segment_key(story_id: &StoryId, segment_id: &SegmentId) -> String {
        format!("story:{}:segment:{}", story_id, segment_id)
    }

    /// Key of the ordered list of a story's segment ids.
    pub fn index_key(story_id: &StoryId) -> String {
        format!("story:{}:segments", story_id)
    }

    /// Store the segment record and append it to the story index.
    pub async fn save(&self, segment: &SegmentWithMediaUrl) -> CacheResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let story_id = &segment.segment.story_id;
        let key = Self::segment_key(story_id, &segment.segment.id);
        let index = Self::index_key(story_id);
        let payload = serde_json::to_string(segment)?;

        redis::pipe()
            .atomic()
            .set_ex(&key, payload, self.ttl_secs)
            .ignore()
            .rpush(&index, segment.segment.id.as_str())
            .ignore()
            .expire(&index, self.ttl_secs as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(key = %key, "Cached segment metadata");
        Ok(())
    }

    /// Load every cached segment of a story in insertion order.
    pub async fn load_story(&self, story_id: &StoryId) -> CacheResult<Vec<SegmentWithMediaUrl>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn.lrange(Self::index_key(story_id), 0, -1).await?;

        let mut payloads = Vec::with_capacity(ids.len());
        for id in ids {
            let key = Self::segment_key(story_id, &SegmentId::from_string(id));
            payloads.push(conn.get(&key).await?);
        }
        decode_segments(payloads)
    }
}

/// Decode cached records in index order; expired records are skipped.
fn decode_segments(payloads: Vec<Option<String>>) -> CacheResult<Vec<SegmentWithMediaUrl>> {
    payloads
        .into_iter()
        .flatten()
        .map(|payload| serde_json::from_str(&payload).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_models::Segment;

    #[test]
    fn test_keys() {
        let story = StoryId::from("s-1");
        assert_eq!(
            SegmentCacheClient::segment_key(&story, &SegmentId::from("a-1")),
            "story:s-1:segment:a-1"
        );
        assert_eq!(SegmentCacheClient::index_key(&story), "story:s-1:segments");
    }

    #[test]
    fn test_client_accepts_url_without_connecting() {
        let config = CacheConfig {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            segment_ttl_secs: 60,
        };
        assert!(SegmentCacheClient::new(&config).is_ok());
    }

    #[test]
    fn test_decode_segments_skips_expired_records() {
        let story = StoryId::from("s-1");
        let record = |id: &str, ordinal| SegmentWithMediaUrl {
            segment: Segment::image(SegmentId::from(id), story.clone(), "a hill", ordinal),
            media_url: format!("https://cdn/{}", id),
        };
        let first = record("i-0", 0);
        let second = record("i-1", 1);

        let decoded = decode_segments(vec![
            Some(serde_json::to_string(&first).unwrap()),
            None,
            Some(serde_json::to_string(&second).unwrap()),
        ])
        .unwrap();
        assert_eq!(decoded, vec![first, second]);

        assert!(decode_segments(vec![Some("not json".to_string())]).is_err());
    }
}
