//! Media-bearing segment records handed between pipeline stages.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Segment, SegmentId};

/// A segment plus its raw generated media.
#[derive(Debug, Clone)]
pub struct SegmentWithMedia {
    pub segment: Segment,
    pub media_content: Vec<u8>,
}

/// A segment plus its media persisted to a scratch file.
///
/// Whoever holds this record owns the scratch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentWithMediaFile {
    pub segment: Segment,
    pub file_name: PathBuf,
}

impl SegmentWithMediaFile {
    pub fn id(&self) -> &SegmentId {
        &self.segment.id
    }
}

/// A segment whose media has been persisted to the media store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentWithMediaUrl {
    #[serde(flatten)]
    pub segment: Segment,
    pub media_url: String,
}

/// An audio segment coupled with the media file of its background image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioWithImageBackground {
    pub audio: SegmentWithMediaFile,
    pub background_image_file_name: PathBuf,
}

impl AudioWithImageBackground {
    pub fn ordinal(&self) -> u32 {
        self.audio.segment.ordinal
    }
}
