//! Stage plumbing shared by every pipeline stage.
//!
//! A stage hands values downstream on a capacity-1 queue and reports
//! failures on a small error queue. Reporting a failure cancels the run, and
//! a failed unit never also produces a value.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use storyreel_models::{AudioWithImageBackground, SegmentWithMedia, SegmentWithMediaFile, VideoSegment};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};

pub const DATA_QUEUE_CAPACITY: usize = 1;
pub const ERROR_QUEUE_CAPACITY: usize = 5;

/// The queues a stage produces.
pub struct StageOutput<T> {
    pub values: mpsc::Receiver<T>,
    pub errors: mpsc::Receiver<PipelineError>,
}

/// Values that may own a scratch file which must go when they are discarded.
pub trait Scratch {
    fn scratch_file(&self) -> Option<&Path>;
}

impl Scratch for SegmentWithMedia {
    fn scratch_file(&self) -> Option<&Path> {
        None
    }
}

impl Scratch for SegmentWithMediaFile {
    fn scratch_file(&self) -> Option<&Path> {
        Some(&self.file_name)
    }
}

impl Scratch for AudioWithImageBackground {
    fn scratch_file(&self) -> Option<&Path> {
        Some(&self.audio.file_name)
    }
}

impl Scratch for VideoSegment {
    fn scratch_file(&self) -> Option<&Path> {
        Some(&self.file_name)
    }
}

/// Remove the scratch file a discarded value owned.
pub async fn discard<T: Scratch>(value: T) {
    if let Some(path) = value.scratch_file() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Failed to remove discarded file {}: {}", path.display(), e);
        }
    }
}

/// Error side of a stage.
#[derive(Clone)]
pub struct ErrorReporter {
    errors: mpsc::Sender<PipelineError>,
    cancel: CancelToken,
    stage: &'static str,
}

impl ErrorReporter {
    /// Cancel the run, then queue `err` for the orchestrator.
    pub fn report(&self, err: PipelineError) {
        self.cancel.cancel();
        if let Err(e) = self.errors.try_send(err) {
            warn!(stage = self.stage, "Dropped stage error: {}", e.into_inner());
        }
    }
}

/// Producer side of a stage.
pub struct StageSink<T> {
    values: mpsc::Sender<T>,
    reporter: ErrorReporter,
}

impl<T> Clone for StageSink<T> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            reporter: self.reporter.clone(),
        }
    }
}

impl<T> StageSink<T> {
    pub fn channel(cancel: CancelToken, stage: &'static str) -> (Self, StageOutput<T>) {
        let (values_tx, values_rx) = mpsc::channel(DATA_QUEUE_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_QUEUE_CAPACITY);
        let sink = Self {
            values: values_tx,
            reporter: ErrorReporter {
                errors: errors_tx,
                cancel,
                stage,
            },
        };
        (
            sink,
            StageOutput {
                values: values_rx,
                errors: errors_rx,
            },
        )
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.reporter.cancel
    }

    pub fn reporter(&self) -> ErrorReporter {
        self.reporter.clone()
    }

    /// Hand `value` downstream unless the run is cancelled first.
    ///
    /// Returns the value back when it could not be delivered, either because
    /// the run was cancelled or the consumer is gone.
    pub async fn send(&self, value: T) -> Result<(), T> {
        let cancel = &self.reporter.cancel;
        if cancel.is_cancelled() {
            return Err(value);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(value),
            permit = self.values.reserve() => match permit {
                Ok(permit) => {
                    permit.send(value);
                    Ok(())
                }
                Err(_) => Err(value),
            },
        }
    }

    pub fn fail(&self, err: PipelineError) {
        self.reporter.report(err);
    }
}

/// Submit a stage body, reporting a rejected submission on its error queue.
pub fn spawn_stage<F>(dispatcher: &TaskDispatcher, name: &'static str, reporter: ErrorReporter, body: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Err(e) = dispatcher.submit_stage(name, body) {
        reporter.report(e);
    }
}

/// Receive the next input unless the run is cancelled first.
pub async fn recv_or_cancel<T>(input: &mut mpsc::Receiver<T>, cancel: &CancelToken) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        item = input.recv() => item,
    }
}

/// Concurrent stage: one dispatcher task per input item.
///
/// Every item is processed by `work` with its own copy of the run token.
/// Results arrive downstream in completion order.
pub fn fan_out<I, O, W, Fut>(
    dispatcher: &TaskDispatcher,
    stage: &'static str,
    mut input: mpsc::Receiver<I>,
    cancel: CancelToken,
    work: W,
) -> StageOutput<O>
where
    I: Send + 'static,
    O: Scratch + Send + 'static,
    W: Fn(I, CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<O>> + Send + 'static,
{
    let (sink, output) = StageSink::channel(cancel.clone(), stage);
    let reporter = sink.reporter();
    let work = Arc::new(work);
    let tasks = dispatcher.clone();

    let coordinator = async move {
        while let Some(item) = recv_or_cancel(&mut input, &cancel).await {
            let task_sink = sink.clone();
            let work = Arc::clone(&work);
            let task_cancel = cancel.clone();

            let unit = async move {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => None,
                    result = work(item, task_cancel.clone()) => Some(result),
                }
            };
            // The worker permit is released before the result waits on the consumer
            let handoff = move |result: Option<PipelineResult<O>>| async move {
                match result {
                    Some(Ok(value)) => {
                        if let Err(value) = task_sink.send(value).await {
                            discard(value).await;
                        }
                    }
                    Some(Err(e)) => task_sink.fail(e),
                    None => {}
                }
            };

            if let Err(e) = tasks.submit_unit(stage, unit, handoff) {
                sink.fail(e);
                break;
            }
        }
    };

    spawn_stage(dispatcher, stage, reporter, coordinator);
    output
}

/// Sequential stage: items are processed one at a time in arrival order.
pub fn sequential<I, O, W, Fut>(
    dispatcher: &TaskDispatcher,
    stage: &'static str,
    mut input: mpsc::Receiver<I>,
    cancel: CancelToken,
    work: W,
) -> StageOutput<O>
where
    I: Send + 'static,
    O: Send + 'static,
    W: Fn(I) -> Fut + Send + 'static,
    Fut: Future<Output = PipelineResult<O>> + Send + 'static,
{
    let (sink, output) = StageSink::channel(cancel.clone(), stage);
    let reporter = sink.reporter();

    let body = async move {
        while let Some(item) = recv_or_cancel(&mut input, &cancel).await {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = work(item) => result,
            };
            match result {
                Ok(value) => {
                    if sink.send(value).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    sink.fail(e);
                    return;
                }
            }
        }
    };

    spawn_stage(dispatcher, stage, reporter, body);
    output
}
