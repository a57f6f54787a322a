//! Cloudflare R2 storage client.
//!
//! This crate provides:
//! - Segment media upload with public URL resolution
//! - Final video publication
//! - The story object key layout

pub mod client;
pub mod error;
pub mod keys;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use keys::{content_type_for, segment_media_key, story_video_key};
