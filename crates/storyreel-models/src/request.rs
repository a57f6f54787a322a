//! Run inputs and outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{StoryId, VideoSegment};

/// Default target story length in words.
pub const DEFAULT_WORDS_PER_STORY: u32 = 300;

/// Inputs of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRequest {
    /// Topic the story is written about
    pub topic: String,
    /// Correlation id, generated per run
    pub story_id: StoryId,
    /// Narration voice
    pub voice_id: String,
    /// Owner the persisted media is filed under
    pub owner_id: String,
    #[serde(default = "default_words_per_story")]
    pub words_per_story: u32,
}

fn default_words_per_story() -> u32 {
    DEFAULT_WORDS_PER_STORY
}

impl StoryRequest {
    /// New request with a fresh story id.
    pub fn new(
        topic: impl Into<String>,
        voice_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            story_id: StoryId::new(),
            voice_id: voice_id.into(),
            owner_id: owner_id.into(),
            words_per_story: DEFAULT_WORDS_PER_STORY,
        }
    }

    pub fn with_words_per_story(mut self, words: u32) -> Self {
        self.words_per_story = words;
        self
    }
}

/// Result of a video pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCreatorResponse {
    pub video_key: String,
    pub video_region: String,
    /// Rendered clips in narration order
    pub segments: Vec<VideoSegment>,
}

impl VideoCreatorResponse {
    /// Total running time in seconds.
    pub fn duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Story saved once its segment events have all been delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub id: StoryId,
    pub owner_id: String,
    pub topic: String,
    pub segment_count: u32,
    pub created_at: DateTime<Utc>,
}

impl StoryRecord {
    pub fn new(request: &StoryRequest, segment_count: u32) -> Self {
        Self {
            id: request.story_id.clone(),
            owner_id: request.owner_id.clone(),
            topic: request.topic.clone(),
            segment_count,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_word_count() {
        let json = r#"{"topic":"dragons","story_id":"s-1","voice_id":"v","owner_id":"u"}"#;
        let request: StoryRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.words_per_story, DEFAULT_WORDS_PER_STORY);
        assert_eq!(request.story_id.as_str(), "s-1");
    }

    #[test]
    fn test_new_request_gets_fresh_story_id() {
        let a = StoryRequest::new("dragons", "v", "u");
        let b = StoryRequest::new("dragons", "v", "u").with_words_per_story(120);
        assert_ne!(a.story_id, b.story_id);
        assert_eq!(b.words_per_story, 120);
    }

    #[test]
    fn test_story_record_carries_request_identity() {
        let request = StoryRequest::new("dragons", "v", "u-1");
        let record = StoryRecord::new(&request, 4);
        assert_eq!(record.id, request.story_id);
        assert_eq!(record.owner_id, "u-1");
        assert_eq!(record.topic, "dragons");
        assert_eq!(record.segment_count, 4);
    }
}
