//! Port implementations for the production collaborators.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;

use storyreel_cache::{EventChannel, SegmentCacheClient, StoryStore};
use storyreel_media::{concatenate_segments, render_still_segment, FfmpegRunner, MediaError};
use storyreel_models::{
    AudioWithImageBackground, PipelineEvent, SegmentWithMedia, SegmentWithMediaUrl, StoryId,
    StoryRecord, StoryRequest, VideoSegment,
};
use storyreel_providers::{ChatStreamClient, ImageClient, SpeechClient};
use storyreel_storage::{content_type_for, segment_media_key, story_video_key, R2Client};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{
    AudioGenerator, EventSink, ImageGenerator, MediaStore, PublishedVideo, SegmentCache,
    SegmentVideoCreator, StorySaver, TextGenerator, VideoConcatenator, VideoPublisher,
};
use crate::stage::{spawn_stage, StageOutput, StageSink};

impl TextGenerator for ChatStreamClient {
    fn generate(
        &self,
        dispatcher: &TaskDispatcher,
        request: &StoryRequest,
        cancel: CancelToken,
    ) -> StageOutput<String> {
        let (sink, output) = StageSink::channel(cancel.clone(), "text_generator");
        let reporter = sink.reporter();
        let client = self.clone();
        let topic = request.topic.clone();
        let words_per_story = request.words_per_story;

        let body = async move {
            let started = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                started = client.stream_story(&topic, words_per_story) => started,
            };
            let mut tokens = match started {
                Ok(stream) => Box::pin(stream),
                Err(e) => {
                    sink.fail(PipelineError::text_generation(e.to_string()));
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    next = tokens.next() => next,
                };
                match next {
                    Some(Ok(token)) => {
                        if sink.send(token).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        sink.fail(PipelineError::text_generation(e.to_string()));
                        return;
                    }
                    None => return,
                }
            }
        };

        spawn_stage(dispatcher, "text_generator", reporter, body);
        output
    }
}

#[async_trait]
impl ImageGenerator for ImageClient {
    async fn generate(&self, description: &str) -> PipelineResult<Vec<u8>> {
        Ok(ImageClient::generate(self, description).await?)
    }
}

#[async_trait]
impl AudioGenerator for SpeechClient {
    async fn generate(&self, text: &str, voice_id: &str) -> PipelineResult<Vec<u8>> {
        Ok(SpeechClient::generate(self, text, voice_id).await?)
    }
}

#[async_trait]
impl MediaStore for R2Client {
    async fn save(&self, media: &SegmentWithMedia, owner_id: &str) -> PipelineResult<String> {
        let key = segment_media_key(owner_id, &media.segment);
        self.upload_bytes(
            media.media_content.clone(),
            &key,
            content_type_for(media.segment.segment_type),
        )
        .await?;
        Ok(self.public_url(&key))
    }
}

#[async_trait]
impl VideoPublisher for R2Client {
    async fn publish(
        &self,
        file: &Path,
        owner_id: &str,
        story_id: &StoryId,
    ) -> PipelineResult<PublishedVideo> {
        let key = story_video_key(owner_id, story_id);
        self.upload_file(file, &key, "video/mp4").await?;
        Ok(PublishedVideo {
            key,
            region: self.region().to_string(),
        })
    }
}

#[async_trait]
impl SegmentCache for SegmentCacheClient {
    async fn save(&self, segment: &SegmentWithMediaUrl) -> PipelineResult<()> {
        Ok(SegmentCacheClient::save(self, segment).await?)
    }
}

#[async_trait]
impl StorySaver for StoryStore {
    async fn save(&self, story: &StoryRecord) -> PipelineResult<()> {
        Ok(StoryStore::save(self, story).await?)
    }
}

#[async_trait]
impl EventSink for EventChannel {
    async fn publish(&self, event: &PipelineEvent) -> PipelineResult<()> {
        Ok(EventChannel::publish(self, event).await?)
    }
}

/// Renders still-image clips with ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct FfmpegVideoCreator {
    runner: FfmpegRunner,
}

impl FfmpegVideoCreator {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

fn media_error(e: MediaError) -> PipelineError {
    if e.is_cancelled() {
        PipelineError::Cancelled
    } else {
        PipelineError::Media(e)
    }
}

#[async_trait]
impl SegmentVideoCreator for FfmpegVideoCreator {
    async fn create(
        &self,
        pair: &AudioWithImageBackground,
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> PipelineResult<VideoSegment> {
        let clip = render_still_segment(
            &self.runner,
            &pair.background_image_file_name,
            &pair.audio.file_name,
            output_dir,
            cancel.cancelled(),
        )
        .await
        .map_err(media_error)?;

        Ok(VideoSegment {
            ordinal: pair.ordinal(),
            file_name: clip.path,
            duration: clip.duration,
        })
    }
}

/// Joins clips with the ffmpeg concat demuxer.
#[derive(Debug, Clone, Default)]
pub struct FfmpegConcatenator {
    runner: FfmpegRunner,
}

impl FfmpegConcatenator {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl VideoConcatenator for FfmpegConcatenator {
    async fn concatenate(&self, files: &[PathBuf], output_dir: &Path) -> PipelineResult<PathBuf> {
        concatenate_segments(&self.runner, files, output_dir)
            .await
            .map_err(media_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_render_maps_to_cancelled() {
        assert!(matches!(media_error(MediaError::Cancelled), PipelineError::Cancelled));
        assert!(matches!(
            media_error(MediaError::EmptyInput),
            PipelineError::Media(MediaError::EmptyInput)
        ));
    }
}
