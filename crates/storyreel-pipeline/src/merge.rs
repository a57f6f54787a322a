//! Fan-in of several queues into one.
//!
//! One reader task per source is submitted to the dispatcher as a stage
//! body. Each reader holds a clone of the output sender, so the output closes
//! exactly when the last reader has drained its source. A reader the dispatcher rejects is
//! reported on the output instead of being dropped.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::dispatcher::TaskDispatcher;
use crate::error::{PipelineError, PipelineResult};

/// Merged output of several sources.
pub struct Merged<T> {
    rejected: VecDeque<T>,
    rx: mpsc::Receiver<T>,
}

impl<T> Merged<T> {
    /// Next value from any source, or `None` once every source is drained.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.rejected.pop_front() {
            return Some(value);
        }
        self.rx.recv().await
    }

    /// Drain every source.
    pub async fn collect(mut self) -> Vec<T> {
        let mut values = Vec::new();
        while let Some(value) = self.recv().await {
            values.push(value);
        }
        values
    }
}

/// Merge `sources`, mapping values with `map` and reader rejections with `on_reject`.
pub fn merge_with<S, T, M, R>(
    dispatcher: &TaskDispatcher,
    sources: Vec<mpsc::Receiver<S>>,
    map: M,
    on_reject: R,
) -> Merged<T>
where
    S: Send + 'static,
    T: Send + 'static,
    M: Fn(S) -> T + Clone + Send + 'static,
    R: Fn(PipelineError) -> T,
{
    let (tx, rx) = mpsc::channel(sources.len().max(1));
    let mut rejected = VecDeque::new();

    for mut source in sources {
        let tx = tx.clone();
        let map = map.clone();
        let reader = async move {
            while let Some(value) = source.recv().await {
                if tx.send(map(value)).await.is_err() {
                    break;
                }
            }
        };
        if let Err(e) = dispatcher.submit_stage("merge_reader", reader) {
            rejected.push_back(on_reject(e));
        }
    }

    Merged { rejected, rx }
}

/// Merge value queues; a rejected reader surfaces as an `Err` item.
pub fn merge<T>(
    dispatcher: &TaskDispatcher,
    sources: Vec<mpsc::Receiver<T>>,
) -> Merged<PipelineResult<T>>
where
    T: Send + 'static,
{
    merge_with(dispatcher, sources, Ok, Err)
}

/// Merge the error queues of a run's stages.
pub fn merge_errors(
    dispatcher: &TaskDispatcher,
    sources: Vec<mpsc::Receiver<PipelineError>>,
) -> Merged<PipelineError> {
    merge_with(dispatcher, sources, |e| e, |e| e)
}
