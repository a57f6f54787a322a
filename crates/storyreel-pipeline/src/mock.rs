//! In-process collaborators for tests and offline runs.
//!
//! Nothing here touches the network. The scripted text generator replays a
//! fixed story word by word, the media generators return static bytes, and
//! the stores keep everything in memory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use storyreel_models::{
    AudioWithImageBackground, PipelineEvent, SegmentWithMedia, SegmentWithMediaUrl, StoryId,
    StoryRecord, StoryRequest, VideoSegment,
};
use storyreel_storage::{segment_media_key, story_video_key};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{
    AudioGenerator, EventSink, ImageGenerator, MediaStore, PublishedVideo, SegmentCache,
    SegmentVideoCreator, StorySaver, TextGenerator, VideoConcatenator, VideoPublisher,
};
use crate::stage::{spawn_stage, StageOutput, StageSink};

/// Story used when no script is given.
pub const SAMPLE_STORY: &str = "[A small fox at the edge of a snowy forest] The fox woke before dawn. \
It sniffed the cold air. Somewhere a branch cracked. [A frozen river under a pink sky] \
It trotted down to the river. The ice sang under its paws. A heron watched from the reeds. \
By noon the fox was home again.";

/// Replays a script as word-sized tokens.
#[derive(Debug, Clone)]
pub struct ScriptedTextGenerator {
    script: String,
    token_delay: Option<Duration>,
    fail_after: Option<usize>,
}

impl Default for ScriptedTextGenerator {
    fn default() -> Self {
        Self::new(SAMPLE_STORY)
    }
}

impl ScriptedTextGenerator {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            token_delay: None,
            fail_after: None,
        }
    }

    /// Wait `delay` before each token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Report a failure after `tokens` tokens instead of finishing.
    pub fn failing_after(mut self, tokens: usize) -> Self {
        self.fail_after = Some(tokens);
        self
    }

    pub fn tokens(&self) -> Vec<String> {
        self.script.split_inclusive(' ').map(str::to_string).collect()
    }
}

impl TextGenerator for ScriptedTextGenerator {
    fn generate(
        &self,
        dispatcher: &TaskDispatcher,
        _request: &StoryRequest,
        cancel: CancelToken,
    ) -> StageOutput<String> {
        let (sink, output) = StageSink::channel(cancel.clone(), "text_generator");
        let reporter = sink.reporter();
        let tokens = self.tokens();
        let token_delay = self.token_delay;
        let fail_after = self.fail_after;

        let body = async move {
            for (sent, token) in tokens.into_iter().enumerate() {
                if fail_after == Some(sent) {
                    sink.fail(PipelineError::text_generation(format!(
                        "scripted failure after {} tokens",
                        sent
                    )));
                    return;
                }
                if let Some(delay) = token_delay {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if sink.send(token).await.is_err() {
                    return;
                }
            }
        };

        spawn_stage(dispatcher, "text_generator", reporter, body);
        output
    }
}

/// Image and audio generator returning fixed bytes.
#[derive(Debug, Clone)]
pub struct StaticMediaGenerator {
    content: Vec<u8>,
    delay: Option<Duration>,
    fail_on: Option<String>,
}

impl Default for StaticMediaGenerator {
    fn default() -> Self {
        Self::new(b"media".to_vec())
    }
}

impl StaticMediaGenerator {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            delay: None,
            fail_on: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail for any text containing `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    async fn produce(&self, text: &str) -> PipelineResult<Vec<u8>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_on {
            Some(needle) if text.contains(needle.as_str()) => {
                Err(PipelineError::internal(format!("generator refused '{}'", text)))
            }
            _ => Ok(self.content.clone()),
        }
    }
}

#[async_trait]
impl ImageGenerator for StaticMediaGenerator {
    async fn generate(&self, description: &str) -> PipelineResult<Vec<u8>> {
        self.produce(description).await
    }
}

#[async_trait]
impl AudioGenerator for StaticMediaGenerator {
    async fn generate(&self, text: &str, _voice_id: &str) -> PipelineResult<Vec<u8>> {
        self.produce(text).await
    }
}

/// Media store keeping uploads in memory.
#[derive(Debug, Default)]
pub struct InMemoryMediaStore {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.iter().map(|(k, _)| k.clone()).collect()
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn save(&self, media: &SegmentWithMedia, owner_id: &str) -> PipelineResult<String> {
        let key = segment_media_key(owner_id, &media.segment);
        self.objects
            .lock()
            .await
            .push((key.clone(), media.media_content.clone()));
        Ok(format!("memory://{}", key))
    }
}

/// Segment cache keeping records in memory, in save order.
#[derive(Debug, Default)]
pub struct InMemorySegmentCache {
    segments: Mutex<Vec<SegmentWithMediaUrl>>,
}

impl InMemorySegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn segments(&self) -> Vec<SegmentWithMediaUrl> {
        self.segments.lock().await.clone()
    }
}

#[async_trait]
impl SegmentCache for InMemorySegmentCache {
    async fn save(&self, segment: &SegmentWithMediaUrl) -> PipelineResult<()> {
        self.segments.lock().await.push(segment.clone());
        Ok(())
    }
}

/// Story saver keeping records in memory. A failing saver rejects every
/// record.
#[derive(Debug, Default)]
pub struct InMemoryStorySaver {
    stories: Mutex<Vec<StoryRecord>>,
    failing: bool,
}

impl InMemoryStorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub async fn stories(&self) -> Vec<StoryRecord> {
        self.stories.lock().await.clone()
    }
}

#[async_trait]
impl StorySaver for InMemoryStorySaver {
    async fn save(&self, story: &StoryRecord) -> PipelineResult<()> {
        if self.failing {
            return Err(PipelineError::internal(format!("story {} was not saved", story.id)));
        }
        self.stories.lock().await.push(story.clone());
        Ok(())
    }
}

/// Event sink recording what it receives.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: &PipelineEvent) -> PipelineResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// "Renders" a clip by copying the narration file.
#[derive(Debug, Clone)]
pub struct CopyVideoCreator {
    clip_duration: f64,
}

impl Default for CopyVideoCreator {
    fn default() -> Self {
        Self { clip_duration: 1.0 }
    }
}

impl CopyVideoCreator {
    pub fn new(clip_duration: f64) -> Self {
        Self { clip_duration }
    }
}

#[async_trait]
impl SegmentVideoCreator for CopyVideoCreator {
    async fn create(
        &self,
        pair: &AudioWithImageBackground,
        output_dir: &Path,
        _cancel: &CancelToken,
    ) -> PipelineResult<VideoSegment> {
        if !pair.background_image_file_name.exists() {
            return Err(PipelineError::internal(format!(
                "background image {} is missing",
                pair.background_image_file_name.display()
            )));
        }
        let file_name = output_dir.join(format!("{}.mp4", pair.audio.segment.id));
        tokio::fs::copy(&pair.audio.file_name, &file_name).await?;
        Ok(VideoSegment {
            ordinal: pair.ordinal(),
            file_name,
            duration: self.clip_duration,
        })
    }
}

/// Joins clips by appending their bytes. Inputs are removed, like the real
/// concatenation.
#[derive(Debug, Clone, Default)]
pub struct AppendConcatenator;

#[async_trait]
impl VideoConcatenator for AppendConcatenator {
    async fn concatenate(&self, files: &[PathBuf], output_dir: &Path) -> PipelineResult<PathBuf> {
        if files.is_empty() {
            return Err(PipelineError::internal("nothing to concatenate"));
        }
        let mut joined = Vec::new();
        for file in files {
            joined.extend(tokio::fs::read(file).await?);
        }
        let output = output_dir.join("story.mp4");
        tokio::fs::write(&output, joined).await?;
        for file in files {
            tokio::fs::remove_file(file).await?;
        }
        Ok(output)
    }
}

/// Publisher recording the keys it was asked to publish.
#[derive(Debug, Default)]
pub struct InMemoryVideoPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemoryVideoPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl VideoPublisher for InMemoryVideoPublisher {
    async fn publish(
        &self,
        file: &Path,
        owner_id: &str,
        story_id: &StoryId,
    ) -> PipelineResult<PublishedVideo> {
        let key = story_video_key(owner_id, story_id);
        let content = tokio::fs::read(file).await?;
        self.published.lock().await.push((key.clone(), content));
        Ok(PublishedVideo {
            key,
            region: "local".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_tokens_rejoin() {
        let generator = ScriptedTextGenerator::new("One two. Three");
        let tokens = generator.tokens();
        assert_eq!(tokens, vec!["One ", "two. ", "Three"]);
        assert_eq!(tokens.concat(), "One two. Three");
    }

    #[tokio::test]
    async fn test_static_generator_failure() {
        let generator = StaticMediaGenerator::default().failing_on("storm");
        assert!(ImageGenerator::generate(&generator, "a calm sea").await.is_ok());
        assert!(ImageGenerator::generate(&generator, "a storm").await.is_err());
    }
}
