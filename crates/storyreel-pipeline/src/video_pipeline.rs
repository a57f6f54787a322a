//! Story-to-video pipeline.
//!
//! Text generation, extraction, media file generation, binding and
//! per-segment rendering run as one streaming flow. Once every stage has
//! settled, the clips are put back in ordinal order, concatenated and
//! published.

use std::sync::Arc;

use tracing::Instrument;

use storyreel_models::{sort_by_ordinal, StoryRequest, VideoCreatorResponse, VideoSegment};

use crate::binder::{MediaBinder, UnmatchedPolicy};
use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::extractor::SegmentExtractor;
use crate::logging::RunLogger;
use crate::media_generation::MediaFileGenerator;
use crate::merge::merge_errors;
use crate::ports::{
    AudioGenerator, ImageGenerator, SegmentVideoCreator, TextGenerator, VideoConcatenator,
    VideoPublisher,
};
use crate::stage::discard;
use crate::video::SegmentVideoGenerator;

/// Collaborators of the video pipeline.
#[derive(Clone)]
pub struct VideoCollaborators {
    pub text: Arc<dyn TextGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub audio: Arc<dyn AudioGenerator>,
    pub creator: Arc<dyn SegmentVideoCreator>,
    pub concatenator: Arc<dyn VideoConcatenator>,
    pub publisher: Arc<dyn VideoPublisher>,
}

/// Story-to-video pipeline.
#[derive(Clone)]
pub struct VideoPipeline {
    dispatcher: TaskDispatcher,
    config: PipelineConfig,
    text: Arc<dyn TextGenerator>,
    extractor: SegmentExtractor,
    generator: MediaFileGenerator,
    binder: MediaBinder,
    video: SegmentVideoGenerator,
    concatenator: Arc<dyn VideoConcatenator>,
    publisher: Arc<dyn VideoPublisher>,
}

impl VideoPipeline {
    pub fn new(dispatcher: TaskDispatcher, config: PipelineConfig, collaborators: VideoCollaborators) -> Self {
        let policy = if config.strict_binding {
            UnmatchedPolicy::Fail
        } else {
            UnmatchedPolicy::DefaultBackground
        };
        Self {
            dispatcher,
            text: collaborators.text,
            extractor: SegmentExtractor::new(config.sentences_per_segment),
            generator: MediaFileGenerator::new(collaborators.images, collaborators.audio),
            binder: MediaBinder::new(config.default_background.clone()).with_policy(policy),
            video: SegmentVideoGenerator::new(collaborators.creator),
            concatenator: collaborators.concatenator,
            publisher: collaborators.publisher,
            config,
        }
    }

    /// Produce and publish the video for `request`.
    ///
    /// Scratch files live in a per-run directory under the configured work
    /// directory and are removed when the run ends, successful or not.
    pub async fn run(
        &self,
        request: StoryRequest,
        parent: &CancelToken,
    ) -> PipelineResult<VideoCreatorResponse> {
        let logger = RunLogger::new(&request.story_id, "video_pipeline");
        let span = logger.create_span();
        self.run_inner(request, parent, logger).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: StoryRequest,
        parent: &CancelToken,
        logger: RunLogger,
    ) -> PipelineResult<VideoCreatorResponse> {
        logger.log_start(&format!("topic '{}'", request.topic));
        let cancel = parent.child();

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("story-{}-", request.story_id))
            .tempdir_in(&self.config.work_dir)?;
        let scratch_dir = scratch.path().to_path_buf();

        let story_id = request.story_id.clone();
        let text = self.text.generate(&self.dispatcher, &request, cancel.clone());
        let segments = self
            .extractor
            .extract(&self.dispatcher, story_id.clone(), text.values, cancel.clone());
        let media = self.generator.generate(
            &self.dispatcher,
            segments.values,
            request.voice_id.clone(),
            scratch_dir.clone(),
            cancel.clone(),
        );
        let pairs = self
            .binder
            .bind_stream(&self.dispatcher, &story_id, media.values, cancel.clone());
        let mut clips = self
            .video
            .generate(&self.dispatcher, pairs.values, scratch_dir.clone(), cancel.clone());

        let mut errors = merge_errors(
            &self.dispatcher,
            vec![text.errors, segments.errors, media.errors, pairs.errors, clips.errors],
        );

        let mut collected: Vec<VideoSegment> = Vec::new();
        let mut first_error: Option<PipelineError> = None;
        let mut clips_open = true;
        let mut errors_open = true;

        while clips_open || errors_open {
            tokio::select! {
                error = errors.recv(), if errors_open => match error {
                    Some(e) => {
                        cancel.cancel();
                        if first_error.is_none() {
                            logger.log_error(&e.to_string());
                            first_error = Some(e);
                        }
                    }
                    None => errors_open = false,
                },
                clip = clips.values.recv(), if clips_open => match clip {
                    Some(clip) => collected.push(clip),
                    None => clips_open = false,
                },
            }
        }

        let outcome = match first_error {
            Some(e) => Err(e),
            None if cancel.is_cancelled() => Err(PipelineError::Cancelled),
            None if collected.is_empty() => Err(PipelineError::internal("story produced no video segments")),
            None => Ok(()),
        };
        if let Err(e) = outcome {
            for clip in collected {
                discard(clip).await;
            }
            return Err(e);
        }

        sort_by_ordinal(&mut collected);
        logger.log_progress(&format!("concatenating {} segments", collected.len()));

        let files: Vec<_> = collected.iter().map(|c| c.file_name.clone()).collect();
        let video_file = self.concatenator.concatenate(&files, &scratch_dir).await?;
        let published = self
            .publisher
            .publish(&video_file, &request.owner_id, &story_id)
            .await?;

        if let Err(e) = scratch.close() {
            logger.log_warning(&format!("failed to remove scratch directory: {}", e));
        }

        let response = VideoCreatorResponse {
            video_key: published.key,
            video_region: published.region,
            segments: collected,
        };
        logger.log_completion(&format!(
            "published {} ({:.1}s)",
            response.video_key,
            response.duration()
        ));
        Ok(response)
    }
}
