//! Story event types.
//!
//! One `SegmentReady` per fully processed segment, then exactly one terminal
//! `GenerationComplete` or `Error` per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SegmentType, SegmentWithMediaUrl, StoryId};

/// Event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventType {
    SegmentReady,
    GenerationComplete,
    Error,
}

impl PipelineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEventType::SegmentReady => "segment_ready",
            PipelineEventType::GenerationComplete => "generation_complete",
            PipelineEventType::Error => "error",
        }
    }
}

/// Story event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A segment's media is persisted and its metadata cached
    SegmentReady {
        story_id: StoryId,
        segment_id: String,
        text: String,
        #[serde(rename = "type")]
        segment_type: SegmentType,
        ordinal: u32,
        url: String,
    },

    /// Every stage finished without error
    GenerationComplete {
        story_id: StoryId,
        message: String,
    },

    /// The run failed; no further events follow
    Error {
        story_id: StoryId,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Build the ready event for a persisted segment.
    pub fn segment_ready(segment: &SegmentWithMediaUrl) -> Self {
        PipelineEvent::SegmentReady {
            story_id: segment.segment.story_id.clone(),
            segment_id: segment.segment.id.to_string(),
            text: segment.segment.text.clone(),
            segment_type: segment.segment.segment_type,
            ordinal: segment.segment.ordinal,
            url: segment.media_url.clone(),
        }
    }

    pub fn generation_complete(story_id: &StoryId) -> Self {
        PipelineEvent::GenerationComplete {
            story_id: story_id.clone(),
            message: "Generation complete".to_string(),
        }
    }

    pub fn error(story_id: &StoryId, message: impl Into<String>) -> Self {
        PipelineEvent::Error {
            story_id: story_id.clone(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> PipelineEventType {
        match self {
            PipelineEvent::SegmentReady { .. } => PipelineEventType::SegmentReady,
            PipelineEvent::GenerationComplete { .. } => PipelineEventType::GenerationComplete,
            PipelineEvent::Error { .. } => PipelineEventType::Error,
        }
    }

    pub fn story_id(&self) -> &StoryId {
        match self {
            PipelineEvent::SegmentReady { story_id, .. }
            | PipelineEvent::GenerationComplete { story_id, .. }
            | PipelineEvent::Error { story_id, .. } => story_id,
        }
    }

    /// Terminal events end a run's event sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineEvent::SegmentReady { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Segment, SegmentId};

    #[test]
    fn test_segment_ready_serialization() {
        let seg = SegmentWithMediaUrl {
            segment: Segment::image(SegmentId::from("i-1"), StoryId::from("s-1"), "A meadow", 0),
            media_url: "https://cdn.example/i-1".to_string(),
        };
        let event = PipelineEvent::segment_ready(&seg);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "segment_ready");
        assert_eq!(json["type"], "image");
        assert_eq!(json["segment_id"], "i-1");
        assert_eq!(json["url"], "https://cdn.example/i-1");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        let story = StoryId::from("s-1");
        assert!(PipelineEvent::generation_complete(&story).is_terminal());
        let err = PipelineEvent::error(&story, "boom");
        assert!(err.is_terminal());
        assert_eq!(err.event_type().as_str(), "error");
        assert_eq!(err.story_id(), &story);
    }
}
