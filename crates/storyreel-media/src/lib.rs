//! FFmpeg CLI wrapper for video assembly.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Cancellation and timeout support via tokio
//! - Still-image + narration segment rendering
//! - Segment concatenation through the concat demuxer
//! - Duration probing through FFprobe

pub mod command;
pub mod concat;
pub mod error;
pub mod probe;
pub mod render;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use concat::{concat_list_contents, concatenate_segments};
pub use error::{MediaError, MediaResult};
pub use probe::get_duration;
pub use render::{render_still_segment, RenderedClip};
