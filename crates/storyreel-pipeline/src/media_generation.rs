//! Media generation stages.
//!
//! Each segment is sent to the image or audio generator on its own
//! dispatcher task, so results come out in completion order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use storyreel_models::{Segment, SegmentType, SegmentWithMedia, SegmentWithMediaFile};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{AudioGenerator, ImageGenerator};
use crate::stage::{fan_out, StageOutput};

/// Immutable inputs shared by every generation task of a run.
struct GenerationParams {
    images: Arc<dyn ImageGenerator>,
    audio: Arc<dyn AudioGenerator>,
    voice_id: String,
}

impl GenerationParams {
    async fn generate(&self, segment: &Segment) -> PipelineResult<Vec<u8>> {
        let result = match segment.segment_type {
            SegmentType::Image => self.images.generate(&segment.text).await,
            SegmentType::Audio => self.audio.generate(&segment.text, &self.voice_id).await,
        };
        result.map_err(|e| PipelineError::media_generation(&segment.id, e.to_string()))
    }
}

/// File extension for a segment type's generated media.
pub fn media_extension(segment_type: SegmentType) -> &'static str {
    match segment_type {
        SegmentType::Audio => "mp3",
        SegmentType::Image => "png",
    }
}

/// Scratch file a segment's media is written to.
pub fn media_file_path(output_dir: &Path, segment: &Segment) -> PathBuf {
    output_dir.join(format!(
        "{}.{}",
        segment.id,
        media_extension(segment.segment_type)
    ))
}

/// Generates media and keeps it in memory.
#[derive(Clone)]
pub struct MediaEnhancer {
    images: Arc<dyn ImageGenerator>,
    audio: Arc<dyn AudioGenerator>,
}

impl MediaEnhancer {
    pub fn new(images: Arc<dyn ImageGenerator>, audio: Arc<dyn AudioGenerator>) -> Self {
        Self { images, audio }
    }

    pub fn enhance(
        &self,
        dispatcher: &TaskDispatcher,
        segments: mpsc::Receiver<Segment>,
        voice_id: String,
        cancel: CancelToken,
    ) -> StageOutput<SegmentWithMedia> {
        let params = Arc::new(GenerationParams {
            images: Arc::clone(&self.images),
            audio: Arc::clone(&self.audio),
            voice_id,
        });

        fan_out(dispatcher, "media_enhancer", segments, cancel, move |segment: Segment, _| {
            let params = Arc::clone(&params);
            async move {
                let media_content = params.generate(&segment).await?;
                debug!(segment_id = %segment.id, bytes = media_content.len(), "Generated media");
                Ok::<_, PipelineError>(SegmentWithMedia {
                    segment,
                    media_content,
                })
            }
        })
    }
}

/// Generates media and writes it to a scratch directory.
#[derive(Clone)]
pub struct MediaFileGenerator {
    images: Arc<dyn ImageGenerator>,
    audio: Arc<dyn AudioGenerator>,
}

impl MediaFileGenerator {
    pub fn new(images: Arc<dyn ImageGenerator>, audio: Arc<dyn AudioGenerator>) -> Self {
        Self { images, audio }
    }

    /// The receiver of each `SegmentWithMediaFile` owns its file.
    pub fn generate(
        &self,
        dispatcher: &TaskDispatcher,
        segments: mpsc::Receiver<Segment>,
        voice_id: String,
        output_dir: PathBuf,
        cancel: CancelToken,
    ) -> StageOutput<SegmentWithMediaFile> {
        let params = Arc::new(GenerationParams {
            images: Arc::clone(&self.images),
            audio: Arc::clone(&self.audio),
            voice_id,
        });
        let output_dir = Arc::new(output_dir);

        fan_out(dispatcher, "media_file_generator", segments, cancel, move |segment: Segment, _| {
            let params = Arc::clone(&params);
            let output_dir = Arc::clone(&output_dir);
            async move {
                let content = params.generate(&segment).await?;
                let file_name = media_file_path(&output_dir, &segment);
                tokio::fs::write(&file_name, &content).await?;
                debug!(segment_id = %segment.id, file = %file_name.display(), "Wrote media file");
                Ok::<_, PipelineError>(SegmentWithMediaFile { segment, file_name })
            }
        })
    }
}
