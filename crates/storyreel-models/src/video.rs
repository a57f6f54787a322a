//! Rendered video segments.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One rendered still-image clip for a single audio segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSegment {
    /// Ordinal of the audio segment this clip narrates
    pub ordinal: u32,
    /// Rendered clip on the scratch filesystem
    pub file_name: PathBuf,
    /// Clip duration in seconds
    pub duration: f64,
}

/// Restore narration order after completion-order collection.
pub fn sort_by_ordinal(segments: &mut [VideoSegment]) {
    segments.sort_by_key(|s| s.ordinal);
}
