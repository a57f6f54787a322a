//! Per-segment video rendering stage.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use storyreel_models::{AudioWithImageBackground, VideoSegment};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::PipelineError;
use crate::ports::SegmentVideoCreator;
use crate::stage::{fan_out, StageOutput};

/// Renders each audio/background pair into a clip as soon as it arrives.
#[derive(Clone)]
pub struct SegmentVideoGenerator {
    creator: Arc<dyn SegmentVideoCreator>,
}

impl SegmentVideoGenerator {
    pub fn new(creator: Arc<dyn SegmentVideoCreator>) -> Self {
        Self { creator }
    }

    /// Audio files are consumed by rendering. Image files are shared between
    /// pairs and stay until the run's scratch directory goes.
    pub fn generate(
        &self,
        dispatcher: &TaskDispatcher,
        pairs: mpsc::Receiver<AudioWithImageBackground>,
        output_dir: PathBuf,
        cancel: CancelToken,
    ) -> StageOutput<VideoSegment> {
        let creator = Arc::clone(&self.creator);
        let output_dir = Arc::new(output_dir);

        fan_out(dispatcher, "video_generator", pairs, cancel, move |pair: AudioWithImageBackground, cancel| {
            let creator = Arc::clone(&creator);
            let output_dir = Arc::clone(&output_dir);
            async move {
                let result = creator.create(&pair, &output_dir, &cancel).await;

                let audio = &pair.audio.file_name;
                if let Err(e) = tokio::fs::remove_file(audio).await {
                    warn!("Failed to remove audio file {}: {}", audio.display(), e);
                }

                let clip = result?;
                debug!(ordinal = clip.ordinal, duration = clip.duration, "Rendered segment clip");
                Ok::<_, PipelineError>(clip)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use storyreel_models::{BackgroundImage, Segment, SegmentId, SegmentWithMediaFile, StoryId};

    use crate::error::PipelineResult;

    struct TouchCreator;

    #[async_trait]
    impl SegmentVideoCreator for TouchCreator {
        async fn create(
            &self,
            pair: &AudioWithImageBackground,
            output_dir: &Path,
            _cancel: &CancelToken,
        ) -> PipelineResult<VideoSegment> {
            let file_name = output_dir.join(format!("{}.mp4", pair.audio.segment.id));
            tokio::fs::write(&file_name, b"clip").await?;
            Ok(VideoSegment {
                ordinal: pair.ordinal(),
                file_name,
                duration: 1.0,
            })
        }
    }

    #[tokio::test]
    async fn test_audio_removed_image_kept() {
        let dir = tempfile::tempdir().unwrap();
        let audio_file = dir.path().join("a.mp3");
        let image_file = dir.path().join("i.png");
        tokio::fs::write(&audio_file, b"audio").await.unwrap();
        tokio::fs::write(&image_file, b"image").await.unwrap();

        let pair = AudioWithImageBackground {
            audio: SegmentWithMediaFile {
                segment: Segment::audio(
                    SegmentId::from("a"),
                    StoryId::from("s"),
                    "Hi.",
                    0,
                    BackgroundImage::Segment(SegmentId::from("i")),
                ),
                file_name: audio_file.clone(),
            },
            background_image_file_name: image_file.clone(),
        };

        let dispatcher = TaskDispatcher::new(4, 16);
        let (tx, rx) = mpsc::channel(1);
        tx.send(pair).await.unwrap();
        drop(tx);

        let mut output = SegmentVideoGenerator::new(Arc::new(TouchCreator)).generate(
            &dispatcher,
            rx,
            dir.path().to_path_buf(),
            CancelToken::new(),
        );

        let clip = output.values.recv().await.unwrap();
        assert_eq!(clip.ordinal, 0);
        assert!(clip.file_name.exists());
        assert!(output.values.recv().await.is_none());
        assert!(!audio_file.exists());
        assert!(image_file.exists());
    }
}
