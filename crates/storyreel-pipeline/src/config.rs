//! Pipeline configuration.

use std::path::PathBuf;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tasks the dispatcher runs at once
    pub max_workers: usize,
    /// Accepted tasks allowed to wait for a worker
    pub max_backlog: usize,
    /// Punctuation marks per narrated segment
    pub sentences_per_segment: usize,
    /// Target story length passed to the text generator
    pub words_per_story: u32,
    /// Parent of the per-run scratch directories
    pub work_dir: PathBuf,
    /// Image used behind narration with no scene description
    pub default_background: PathBuf,
    /// Fail the run instead of using the default background for unmatched audio
    pub strict_binding: bool,
    /// Upper bound for a single ffmpeg invocation
    pub ffmpeg_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 120,
            max_backlog: 1024,
            sentences_per_segment: 3,
            words_per_story: 300,
            work_dir: PathBuf::from("/tmp/storyreel"),
            default_background: PathBuf::from("assets/default.jpg"),
            strict_binding: false,
            ffmpeg_timeout_secs: 600,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_workers: std::env::var("STORYREEL_MAX_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_workers),
            max_backlog: std::env::var("STORYREEL_MAX_BACKLOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_backlog),
            sentences_per_segment: std::env::var("STORYREEL_SENTENCES_PER_SEGMENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.sentences_per_segment),
            words_per_story: std::env::var("STORYREEL_WORDS_PER_STORY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.words_per_story),
            work_dir: std::env::var("STORYREEL_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            default_background: std::env::var("STORYREEL_DEFAULT_BACKGROUND")
                .map(PathBuf::from)
                .unwrap_or(defaults.default_background),
            strict_binding: std::env::var("STORYREEL_STRICT_BINDING")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.strict_binding),
            ffmpeg_timeout_secs: std::env::var("STORYREEL_FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.ffmpeg_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_workers, 120);
        assert_eq!(config.sentences_per_segment, 3);
        assert!(!config.strict_binding);
    }
}
