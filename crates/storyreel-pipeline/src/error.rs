//! Pipeline error types.

use thiserror::Error;

use storyreel_models::SegmentId;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Coarse classification of a run failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A token, media or persistence collaborator failed
    Upstream,
    /// Malformed bracket structure in the generated text
    Parse,
    /// The dispatcher refused work
    Submission,
    /// Audio whose background image never arrived
    Association,
    Cancelled,
    Internal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Text generation failed: {0}")]
    TextGeneration(String),

    #[error("Media generation failed for segment {segment_id}: {message}")]
    MediaGeneration { segment_id: SegmentId, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Task submission rejected: {0}")]
    Submission(String),

    #[error("Audio segment {audio_id} references image {image_id}, which never arrived")]
    Unmatched { audio_id: SegmentId, image_id: SegmentId },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Provider error: {0}")]
    Provider(#[from] storyreel_providers::ProviderError),

    #[error("Media error: {0}")]
    Media(#[from] storyreel_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] storyreel_storage::StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] storyreel_cache::CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn text_generation(msg: impl Into<String>) -> Self {
        Self::TextGeneration(msg.into())
    }

    pub fn media_generation(segment_id: &SegmentId, msg: impl Into<String>) -> Self {
        Self::MediaGeneration {
            segment_id: segment_id.clone(),
            message: msg.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TextGeneration(_)
            | PipelineError::MediaGeneration { .. }
            | PipelineError::Provider(_)
            | PipelineError::Storage(_)
            | PipelineError::Cache(_) => ErrorKind::Upstream,
            PipelineError::Media(e) if e.is_cancelled() => ErrorKind::Cancelled,
            PipelineError::Media(_) => ErrorKind::Upstream,
            PipelineError::Parse(_) => ErrorKind::Parse,
            PipelineError::Submission(_) => ErrorKind::Submission,
            PipelineError::Unmatched { .. } => ErrorKind::Association,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::ConfigError(_) | PipelineError::Internal(_) | PipelineError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(PipelineError::parse("stray ]").kind(), ErrorKind::Parse);
        assert_eq!(PipelineError::submission("full").kind(), ErrorKind::Submission);
        assert_eq!(
            PipelineError::media_generation(&SegmentId::from("a"), "429").kind(),
            ErrorKind::Upstream
        );
        assert_eq!(
            PipelineError::from(storyreel_media::MediaError::Cancelled).kind(),
            ErrorKind::Cancelled
        );
        assert!(PipelineError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_unmatched_message_names_both_segments() {
        let err = PipelineError::Unmatched {
            audio_id: SegmentId::from("a-1"),
            image_id: SegmentId::from("i-9"),
        };
        let msg = err.to_string();
        assert!(msg.contains("a-1") && msg.contains("i-9"));
        assert_eq!(err.kind(), ErrorKind::Association);
    }
}
