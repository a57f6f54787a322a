//! Story-to-video segment pipeline.
//!
//! This crate provides:
//! - Streaming extraction of narrated and scene segments from generated text
//! - Concurrent media generation on a shared bounded task dispatcher
//! - Audio/background binding tolerant of any arrival order
//! - Segment event and video orchestrators with run-wide cancellation
//! - Adapters for the HTTP, storage, cache and ffmpeg collaborators

pub mod adapters;
pub mod binder;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod media_generation;
pub mod merge;
pub mod mock;
pub mod orchestrator;
pub mod ports;
pub mod savers;
pub mod stage;
pub mod video;
pub mod video_pipeline;

pub use adapters::{FfmpegConcatenator, FfmpegVideoCreator};
pub use binder::{BindState, MediaBinder, UnmatchedPolicy};
pub use cancel::CancelToken;
pub use config::PipelineConfig;
pub use dispatcher::{PoolStats, TaskDispatcher};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use extractor::{clean_text, SegmentExtractor, SegmentParser};
pub use logging::RunLogger;
pub use media_generation::{MediaEnhancer, MediaFileGenerator};
pub use merge::{merge, merge_errors, Merged};
pub use orchestrator::{forward_events, SegmentPipeline};
pub use stage::StageOutput;
pub use video::SegmentVideoGenerator;
pub use video_pipeline::{VideoCollaborators, VideoPipeline};
