//! Shared data models for StoryReel.
//!
//! This crate provides Serde-serializable types for:
//! - Story and segment identifiers
//! - Narrative segments (audio / image) and their background association
//! - Media-bearing segment records handed between pipeline stages
//! - Rendered video segments
//! - Run requests, saved story records and video results
//! - Story event schemas

pub mod event;
pub mod ids;
pub mod media;
pub mod request;
pub mod segment;
pub mod video;

// Re-export common types
pub use event::{PipelineEvent, PipelineEventType};
pub use ids::{SegmentId, StoryId};
pub use media::{AudioWithImageBackground, SegmentWithMedia, SegmentWithMediaFile, SegmentWithMediaUrl};
pub use request::{StoryRecord, StoryRequest, VideoCreatorResponse, DEFAULT_WORDS_PER_STORY};
pub use segment::{BackgroundImage, Segment, SegmentType, DEFAULT_IMAGE_ID};
pub use video::{sort_by_ordinal, VideoSegment};
