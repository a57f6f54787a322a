//! Narrative segments.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{SegmentId, StoryId};

/// Sentinel background id used by audio segments extracted before any image.
pub const DEFAULT_IMAGE_ID: &str = "default";

/// Kind of narrative content a segment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    /// Spoken text, rendered through the audio generator
    Audio,
    /// Scene description, rendered through the image generator
    Image,
}

impl SegmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::Audio => "audio",
            SegmentType::Image => "image",
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Background reference carried by an audio segment.
///
/// Serialized as a plain string: either the sentinel `"default"` or the id of
/// an image segment of the same story.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackgroundImage {
    /// The well-known default background
    Default,
    /// An image segment emitted earlier (or later) in the same run
    Segment(SegmentId),
}

impl BackgroundImage {
    pub fn is_default(&self) -> bool {
        matches!(self, BackgroundImage::Default)
    }

    /// Image segment id, when this is not the default background.
    pub fn segment_id(&self) -> Option<&SegmentId> {
        match self {
            BackgroundImage::Default => None,
            BackgroundImage::Segment(id) => Some(id),
        }
    }
}

impl From<String> for BackgroundImage {
    fn from(s: String) -> Self {
        if s == DEFAULT_IMAGE_ID {
            BackgroundImage::Default
        } else {
            BackgroundImage::Segment(SegmentId(s))
        }
    }
}

impl From<BackgroundImage> for String {
    fn from(b: BackgroundImage) -> Self {
        match b {
            BackgroundImage::Default => DEFAULT_IMAGE_ID.to_string(),
            BackgroundImage::Segment(id) => id.0,
        }
    }
}

impl fmt::Display for BackgroundImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundImage::Default => write!(f, "{}", DEFAULT_IMAGE_ID),
            BackgroundImage::Segment(id) => write!(f, "{}", id),
        }
    }
}

/// One unit of narrative content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Unique segment id
    pub id: SegmentId,
    /// Story this segment belongs to
    pub story_id: StoryId,
    /// Spoken text (audio) or scene description (image)
    pub text: String,
    /// Segment kind
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    /// Position within this segment type's emission sequence (0-based)
    pub ordinal: u32,
    /// Background association, set only on audio segments
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub background_image: Option<BackgroundImage>,
}

impl Segment {
    /// Create an audio segment.
    pub fn audio(
        id: SegmentId,
        story_id: StoryId,
        text: impl Into<String>,
        ordinal: u32,
        background_image: BackgroundImage,
    ) -> Self {
        Self {
            id,
            story_id,
            text: text.into(),
            segment_type: SegmentType::Audio,
            ordinal,
            background_image: Some(background_image),
        }
    }

    /// Create an image segment.
    pub fn image(id: SegmentId, story_id: StoryId, text: impl Into<String>, ordinal: u32) -> Self {
        Self {
            id,
            story_id,
            text: text.into(),
            segment_type: SegmentType::Image,
            ordinal,
            background_image: None,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.segment_type == SegmentType::Audio
    }

    pub fn is_image(&self) -> bool {
        self.segment_type == SegmentType::Image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_image_string_form() {
        let default: BackgroundImage = DEFAULT_IMAGE_ID.to_string().into();
        assert!(default.is_default());

        let image: BackgroundImage = "img-1".to_string().into();
        assert_eq!(image.segment_id(), Some(&SegmentId::from("img-1")));
        assert_eq!(String::from(image), "img-1");
    }

    #[test]
    fn test_segment_json_shape() {
        let seg = Segment::audio(
            SegmentId::from("a-1"),
            StoryId::from("s-1"),
            "Hello there.",
            0,
            BackgroundImage::Default,
        );
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["background_image"], "default");

        let img = Segment::image(SegmentId::from("i-1"), StoryId::from("s-1"), "A meadow", 0);
        let json = serde_json::to_value(&img).unwrap();
        assert!(json.get("background_image").is_none());
    }
}
