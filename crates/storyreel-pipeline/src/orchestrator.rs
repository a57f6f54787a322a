//! Segment event pipeline.
//!
//! Wires text generation, extraction, media enhancement and both savers for
//! one story, and turns their outputs into a single event sequence: zero or
//! more `SegmentReady` events followed by exactly one terminal event. A run
//! that finishes cleanly saves its story record before `GenerationComplete`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, Instrument};

use storyreel_models::{PipelineEvent, StoryRecord, StoryRequest};

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::extractor::SegmentExtractor;
use crate::logging::RunLogger;
use crate::media_generation::MediaEnhancer;
use crate::merge::{merge_errors, Merged};
use crate::ports::{
    AudioGenerator, EventSink, ImageGenerator, MediaStore, SegmentCache, StorySaver, TextGenerator,
};
use crate::savers::{MediaSaver, MetadataSaver};

/// Buffered events between the relay and the caller.
pub const EVENT_QUEUE_CAPACITY: usize = 16;

/// Message of the terminal event of a run cancelled from outside.
pub const CANCELLED_MESSAGE: &str = "Generation cancelled";

/// Story-to-segment-events pipeline.
#[derive(Clone)]
pub struct SegmentPipeline {
    dispatcher: TaskDispatcher,
    text: Arc<dyn TextGenerator>,
    extractor: SegmentExtractor,
    enhancer: MediaEnhancer,
    media_saver: MediaSaver,
    metadata_saver: MetadataSaver,
    stories: Arc<dyn StorySaver>,
}

impl SegmentPipeline {
    pub fn new(
        dispatcher: TaskDispatcher,
        config: &PipelineConfig,
        text: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
        audio: Arc<dyn AudioGenerator>,
        store: Arc<dyn MediaStore>,
        cache: Arc<dyn SegmentCache>,
        stories: Arc<dyn StorySaver>,
    ) -> Self {
        Self {
            dispatcher,
            text,
            extractor: SegmentExtractor::new(config.sentences_per_segment),
            enhancer: MediaEnhancer::new(images, audio),
            media_saver: MediaSaver::new(store),
            metadata_saver: MetadataSaver::new(cache),
            stories,
        }
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// Start a run and return its event queue.
    ///
    /// The run gets its own child of `parent`. Dropping the returned receiver
    /// cancels the run.
    pub fn run(&self, request: StoryRequest, parent: &CancelToken) -> mpsc::Receiver<PipelineEvent> {
        let cancel = parent.child();
        let story_id = request.story_id.clone();
        let logger = RunLogger::new(&story_id, "orchestrator");
        logger.log_start(&format!("topic '{}'", request.topic));

        let text = self.text.generate(&self.dispatcher, &request, cancel.clone());
        let segments = self
            .extractor
            .extract(&self.dispatcher, story_id.clone(), text.values, cancel.clone());
        let media = self.enhancer.enhance(
            &self.dispatcher,
            segments.values,
            request.voice_id.clone(),
            cancel.clone(),
        );
        let urls = self.media_saver.save(
            &self.dispatcher,
            media.values,
            request.owner_id.clone(),
            cancel.clone(),
        );
        let events = self
            .metadata_saver
            .save(&self.dispatcher, urls.values, cancel.clone());

        let errors = merge_errors(
            &self.dispatcher,
            vec![text.errors, segments.errors, media.errors, urls.errors, events.errors],
        );

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let fallback = tx.clone();
        let span = logger.create_span();
        let relay = Relay {
            story: StoryRecord::new(&request, 0),
            stories: Arc::clone(&self.stories),
            tx,
            cancel: cancel.clone(),
            logger: logger.clone(),
        }
        .run(events.values, errors)
        .instrument(span);

        if let Err(e) = self.dispatcher.submit_stage("event_relay", relay) {
            cancel.cancel();
            logger.log_error(&e.to_string());
            let _ = fallback.try_send(PipelineEvent::error(&story_id, e.to_string()));
        }
        rx
    }
}

/// Turns a run's stage outputs into its event sequence.
struct Relay {
    story: StoryRecord,
    stories: Arc<dyn StorySaver>,
    tx: mpsc::Sender<PipelineEvent>,
    cancel: CancelToken,
    logger: RunLogger,
}

impl Relay {
    /// Forward events until the run settles, then emit the terminal event.
    async fn run(mut self, mut events: mpsc::Receiver<PipelineEvent>, mut errors: Merged<PipelineError>) {
        let cancel = self.cancel.clone();
        let mut first_error: Option<PipelineError> = None;
        let mut events_open = true;
        let mut errors_open = true;

        while events_open || errors_open {
            tokio::select! {
                error = errors.recv(), if errors_open => match error {
                    Some(e) => {
                        cancel.cancel();
                        if first_error.is_none() {
                            self.logger.log_error(&e.to_string());
                            first_error = Some(e);
                        } else {
                            debug!("Suppressed follow-up error: {}", e);
                        }
                    }
                    None => errors_open = false,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if first_error.is_some() || cancel.is_cancelled() {
                            continue;
                        }
                        if self.tx.send(event).await.is_err() {
                            self.logger.log_warning("event receiver dropped, cancelling run");
                            cancel.cancel();
                        } else {
                            self.story.segment_count += 1;
                        }
                    }
                    None => events_open = false,
                },
            }
        }

        let outcome = match first_error {
            Some(e) => Err(e),
            None => self.save_story().await,
        };
        let story_id = &self.story.id;
        let terminal = match outcome {
            Ok(()) => {
                self.logger
                    .log_completion(&format!("{} segments delivered", self.story.segment_count));
                PipelineEvent::generation_complete(story_id)
            }
            Err(e) if e.is_cancelled() => {
                self.logger.log_warning("run cancelled");
                PipelineEvent::error(story_id, CANCELLED_MESSAGE)
            }
            Err(e) => PipelineEvent::error(story_id, e.to_string()),
        };
        let _ = self.tx.send(terminal).await;
    }

    async fn save_story(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let saved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            saved = self.stories.save(&self.story) => saved,
        };
        if let Err(e) = &saved {
            if !e.is_cancelled() {
                self.logger.log_error(&format!("failed to save story: {}", e));
            }
        }
        saved
    }
}

/// Publish every event of a run to `sink` and return the terminal event.
///
/// Returns `Ok(None)` if the queue closed without a terminal event.
pub async fn forward_events(
    mut events: mpsc::Receiver<PipelineEvent>,
    sink: &dyn EventSink,
) -> PipelineResult<Option<PipelineEvent>> {
    while let Some(event) = events.recv().await {
        sink.publish(&event).await?;
        if event.is_terminal() {
            return Ok(Some(event));
        }
    }
    Ok(None)
}
