//! Redis-backed segment cache, story records and story event channel.

pub mod error;
pub mod events;
pub mod segments;
pub mod stories;

pub use error::{CacheError, CacheResult};
pub use events::EventChannel;
pub use segments::{CacheConfig, SegmentCacheClient};
pub use stories::StoryStore;
