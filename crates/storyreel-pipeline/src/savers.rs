//! Persistence stages for the event pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use storyreel_models::{PipelineEvent, SegmentWithMedia, SegmentWithMediaUrl};

use crate::cancel::CancelToken;
use crate::dispatcher::TaskDispatcher;
use crate::error::PipelineError;
use crate::ports::{MediaStore, SegmentCache};
use crate::stage::{sequential, StageOutput};

/// Uploads generated media, one segment at a time.
#[derive(Clone)]
pub struct MediaSaver {
    store: Arc<dyn MediaStore>,
}

impl MediaSaver {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }

    pub fn save(
        &self,
        dispatcher: &TaskDispatcher,
        input: mpsc::Receiver<SegmentWithMedia>,
        owner_id: String,
        cancel: CancelToken,
    ) -> StageOutput<SegmentWithMediaUrl> {
        let store = Arc::clone(&self.store);
        let owner_id = Arc::new(owner_id);

        sequential(dispatcher, "media_saver", input, cancel, move |media: SegmentWithMedia| {
            let store = Arc::clone(&store);
            let owner_id = Arc::clone(&owner_id);
            async move {
                let media_url = store.save(&media, &owner_id).await?;
                debug!(segment_id = %media.segment.id, url = %media_url, "Saved segment media");
                Ok::<_, PipelineError>(SegmentWithMediaUrl {
                    segment: media.segment,
                    media_url,
                })
            }
        })
    }
}

/// Caches segment metadata and emits a ready event per segment.
#[derive(Clone)]
pub struct MetadataSaver {
    cache: Arc<dyn SegmentCache>,
}

impl MetadataSaver {
    pub fn new(cache: Arc<dyn SegmentCache>) -> Self {
        Self { cache }
    }

    pub fn save(
        &self,
        dispatcher: &TaskDispatcher,
        input: mpsc::Receiver<SegmentWithMediaUrl>,
        cancel: CancelToken,
    ) -> StageOutput<PipelineEvent> {
        let cache = Arc::clone(&self.cache);

        sequential(dispatcher, "metadata_saver", input, cancel, move |segment: SegmentWithMediaUrl| {
            let cache = Arc::clone(&cache);
            async move {
                cache.save(&segment).await?;
                Ok::<_, PipelineError>(PipelineEvent::segment_ready(&segment))
            }
        })
    }
}
