//! Object key layout.

use storyreel_models::{Segment, SegmentType, StoryId};

/// Key for a segment's generated media.
///
/// Layout: `user/{owner}/story/{story}/{type}/{segment}`.
pub fn segment_media_key(owner_id: &str, segment: &Segment) -> String {
    format!(
        "user/{}/story/{}/{}/{}",
        owner_id, segment.story_id, segment.segment_type, segment.id
    )
}

/// Key for a story's final concatenated video.
pub fn story_video_key(owner_id: &str, story_id: &StoryId) -> String {
    format!(
        "user/{}/story/{}/video/{}.mp4",
        owner_id,
        story_id,
        uuid::Uuid::new_v4()
    )
}

/// Content type of generated media per segment type.
pub fn content_type_for(segment_type: SegmentType) -> &'static str {
    match segment_type {
        SegmentType::Audio => "audio/mpeg",
        SegmentType::Image => "image/png",
    }
}
