//! Capability contracts for the pipeline's collaborators.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use storyreel_models::{
    AudioWithImageBackground, PipelineEvent, SegmentWithMedia, SegmentWithMediaUrl, StoryId,
    StoryRecord, StoryRequest, VideoSegment,
};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::PipelineResult;
use crate::stage::StageOutput;

/// Source of story text.
///
/// Tokens arrive on the output's value queue, which closes on normal
/// completion. A failure is reported on the error queue (cancelling the run)
/// and no further tokens follow it. Implementations run their producer on
/// `dispatcher` and stop promptly once `cancel` fires.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        dispatcher: &TaskDispatcher,
        request: &StoryRequest,
        cancel: CancelToken,
    ) -> StageOutput<String>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, description: &str) -> PipelineResult<Vec<u8>>;
}

#[async_trait]
pub trait AudioGenerator: Send + Sync {
    async fn generate(&self, text: &str, voice_id: &str) -> PipelineResult<Vec<u8>>;
}

/// Persists generated media and returns the URL it is served from.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save(&self, media: &SegmentWithMedia, owner_id: &str) -> PipelineResult<String>;
}

/// Records persisted segments.
#[async_trait]
pub trait SegmentCache: Send + Sync {
    async fn save(&self, segment: &SegmentWithMediaUrl) -> PipelineResult<()>;
}

/// Records a story once all of its segments have been delivered.
#[async_trait]
pub trait StorySaver: Send + Sync {
    async fn save(&self, story: &StoryRecord) -> PipelineResult<()>;
}

/// Renders one narrated still-image clip.
#[async_trait]
pub trait SegmentVideoCreator: Send + Sync {
    async fn create(
        &self,
        pair: &AudioWithImageBackground,
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> PipelineResult<VideoSegment>;
}

/// Joins clips, in the given order, into one file inside `output_dir`.
#[async_trait]
pub trait VideoConcatenator: Send + Sync {
    async fn concatenate(&self, files: &[PathBuf], output_dir: &Path) -> PipelineResult<PathBuf>;
}

/// Where a finished video was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedVideo {
    pub key: String,
    pub region: String,
}

#[async_trait]
pub trait VideoPublisher: Send + Sync {
    async fn publish(
        &self,
        file: &Path,
        owner_id: &str,
        story_id: &StoryId,
    ) -> PipelineResult<PublishedVideo>;
}

/// Delivers story events to clients.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &PipelineEvent) -> PipelineResult<()>;
}
