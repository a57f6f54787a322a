//! Media binder: couples audio with its background image.
//!
//! Media-bearing segments arrive in completion order, so an audio segment may
//! show up before or after the image it refers to. Audio waiting for an image
//! is parked by image id and released the moment that image is seen.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::debug;

use storyreel_models::{
    AudioWithImageBackground, BackgroundImage, SegmentId, SegmentType, SegmentWithMediaFile,
    StoryId,
};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;
use crate::stage::{discard, recv_or_cancel, spawn_stage, StageOutput, StageSink};

/// What to do with audio whose image never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmatchedPolicy {
    /// Couple it with the default background and log a warning
    #[default]
    DefaultBackground,
    /// Fail the run with an association error
    Fail,
}

/// Matching state of one run.
#[derive(Debug)]
pub struct BindState {
    default_background: PathBuf,
    images: HashMap<SegmentId, PathBuf>,
    pending: HashMap<SegmentId, Vec<SegmentWithMediaFile>>,
}

impl BindState {
    pub fn new(default_background: PathBuf) -> Self {
        Self {
            default_background,
            images: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Take one arrival and return the pairs it completes.
    pub fn accept(&mut self, item: SegmentWithMediaFile) -> Vec<AudioWithImageBackground> {
        match item.segment.segment_type {
            SegmentType::Image => {
                let image_file = item.file_name.clone();
                let released = self.pending.remove(&item.segment.id).unwrap_or_default();
                let pairs = released
                    .into_iter()
                    .map(|audio| AudioWithImageBackground {
                        audio,
                        background_image_file_name: image_file.clone(),
                    })
                    .collect();
                self.images.insert(item.segment.id, image_file);
                pairs
            }
            SegmentType::Audio => {
                let image_id = match &item.segment.background_image {
                    Some(BackgroundImage::Segment(id)) => id.clone(),
                    Some(BackgroundImage::Default) | None => {
                        return vec![self.couple_default(item)];
                    }
                };

                match self.images.get(&image_id) {
                    Some(image_file) => vec![AudioWithImageBackground {
                        audio: item,
                        background_image_file_name: image_file.clone(),
                    }],
                    None => {
                        self.pending.entry(image_id).or_default().push(item);
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Number of audio segments still waiting for their image.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Drain audio still waiting at end of input as `(audio, awaited image id)`.
    pub fn take_unmatched(&mut self) -> Vec<(SegmentWithMediaFile, SegmentId)> {
        let mut unmatched: Vec<(SegmentWithMediaFile, SegmentId)> = self
            .pending
            .drain()
            .flat_map(|(image_id, audio)| audio.into_iter().map(move |a| (a, image_id.clone())))
            .collect();
        unmatched.sort_by_key(|(audio, _)| audio.segment.ordinal);
        unmatched
    }

    pub fn couple_default(&self, audio: SegmentWithMediaFile) -> AudioWithImageBackground {
        AudioWithImageBackground {
            audio,
            background_image_file_name: self.default_background.clone(),
        }
    }
}

/// Binder stage.
#[derive(Debug, Clone)]
pub struct MediaBinder {
    default_background: PathBuf,
    policy: UnmatchedPolicy,
}

impl MediaBinder {
    pub fn new(default_background: PathBuf) -> Self {
        Self {
            default_background,
            policy: UnmatchedPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: UnmatchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve unmatched audio at end of input according to the policy.
    fn resolve_unmatched(
        &self,
        state: &mut BindState,
        logger: &RunLogger,
    ) -> PipelineResult<Vec<AudioWithImageBackground>> {
        let unmatched = state.take_unmatched();
        let mut pairs = Vec::with_capacity(unmatched.len());
        for (audio, image_id) in unmatched {
            let err = PipelineError::Unmatched {
                audio_id: audio.segment.id.clone(),
                image_id,
            };
            match self.policy {
                UnmatchedPolicy::Fail => return Err(err),
                UnmatchedPolicy::DefaultBackground => {
                    logger.log_warning(&format!("{}; using the default background", err));
                    pairs.push(state.couple_default(audio));
                }
            }
        }
        Ok(pairs)
    }

    /// Streaming form: emits pairs as they complete and closes with the input.
    pub fn bind_stream(
        &self,
        dispatcher: &TaskDispatcher,
        story_id: &StoryId,
        mut input: mpsc::Receiver<SegmentWithMediaFile>,
        cancel: CancelToken,
    ) -> StageOutput<AudioWithImageBackground> {
        let (sink, output) = StageSink::channel(cancel.clone(), "binder");
        let reporter = sink.reporter();
        let logger = RunLogger::new(story_id, "binder");
        let binder = self.clone();
        let mut state = BindState::new(self.default_background.clone());

        let body = async move {
            while let Some(item) = recv_or_cancel(&mut input, &cancel).await {
                for pair in state.accept(item) {
                    if let Err(pair) = sink.send(pair).await {
                        discard(pair).await;
                        return;
                    }
                }
            }
            if cancel.is_cancelled() {
                return;
            }

            match binder.resolve_unmatched(&mut state, &logger) {
                Ok(pairs) => {
                    for pair in pairs {
                        if let Err(pair) = sink.send(pair).await {
                            discard(pair).await;
                            return;
                        }
                    }
                    debug!("Binder input closed");
                }
                Err(e) => sink.fail(e),
            }
        };

        spawn_stage(dispatcher, "binder", reporter, body);
        output
    }

    /// Collecting form: consumes the whole input and returns every pair in
    /// ordinal order. Fails fast with [`PipelineError::Cancelled`].
    pub async fn bind_all(
        &self,
        story_id: &StoryId,
        mut input: mpsc::Receiver<SegmentWithMediaFile>,
        cancel: &CancelToken,
    ) -> PipelineResult<Vec<AudioWithImageBackground>> {
        let logger = RunLogger::new(story_id, "binder");
        let mut state = BindState::new(self.default_background.clone());
        let mut pairs = Vec::new();

        loop {
            match recv_or_cancel(&mut input, cancel).await {
                Some(item) => pairs.extend(state.accept(item)),
                None if cancel.is_cancelled() => return Err(PipelineError::Cancelled),
                None => break,
            }
        }

        pairs.extend(self.resolve_unmatched(&mut state, &logger)?);
        pairs.sort_by_key(|p| p.ordinal());
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_models::Segment;

    fn image(id: &str) -> SegmentWithMediaFile {
        SegmentWithMediaFile {
            segment: Segment::image(SegmentId::from(id), StoryId::from("s"), id, 0),
            file_name: PathBuf::from(format!("{}.png", id)),
        }
    }

    fn audio(id: &str, ordinal: u32, background: BackgroundImage) -> SegmentWithMediaFile {
        SegmentWithMediaFile {
            segment: Segment::audio(SegmentId::from(id), StoryId::from("s"), id, ordinal, background),
            file_name: PathBuf::from(format!("{}.mp3", id)),
        }
    }

    fn on(image_id: &str) -> BackgroundImage {
        BackgroundImage::Segment(SegmentId::from(image_id))
    }

    #[test]
    fn test_image_before_audio() {
        let mut state = BindState::new(PathBuf::from("default.jpg"));
        assert!(state.accept(image("i")).is_empty());
        let pairs = state.accept(audio("a", 0, on("i")));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].background_image_file_name, PathBuf::from("i.png"));
    }

    #[test]
    fn test_audio_before_image_waits() {
        let mut state = BindState::new(PathBuf::from("default.jpg"));
        assert!(state.accept(audio("a0", 0, on("i"))).is_empty());
        assert!(state.accept(audio("a1", 1, on("i"))).is_empty());
        assert_eq!(state.pending_len(), 2);

        let pairs = state.accept(image("i"));
        assert_eq!(pairs.len(), 2);
        assert_eq!(state.pending_len(), 0);
        assert!(pairs.iter().all(|p| p.background_image_file_name == PathBuf::from("i.png")));
    }

    #[test]
    fn test_default_background_is_immediate() {
        let mut state = BindState::new(PathBuf::from("default.jpg"));
        let pairs = state.accept(audio("a", 0, BackgroundImage::Default));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].background_image_file_name, PathBuf::from("default.jpg"));
        assert!(state.accept(image("i")).is_empty());
    }

    #[test]
    fn test_take_unmatched_orders_by_ordinal() {
        let mut state = BindState::new(PathBuf::from("default.jpg"));
        state.accept(audio("a2", 2, on("x")));
        state.accept(audio("a1", 1, on("y")));
        let unmatched = state.take_unmatched();
        let ordinals: Vec<u32> = unmatched.iter().map(|(a, _)| a.segment.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2]);
        assert_eq!(state.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_bind_all_fails_fast_on_cancel() {
        let binder = MediaBinder::new(PathBuf::from("default.jpg"));
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = binder.bind_all(&StoryId::from("s"), rx, &cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_unmatched_audio() {
        let binder = MediaBinder::new(PathBuf::from("default.jpg")).with_policy(UnmatchedPolicy::Fail);
        let (tx, rx) = mpsc::channel(1);
        tx.send(audio("a", 0, on("missing"))).await.unwrap();
        drop(tx);

        let result = binder.bind_all(&StoryId::from("s"), rx, &CancelToken::new()).await;
        assert!(matches!(result, Err(PipelineError::Unmatched { .. })));
    }
}
