//! Structured run logging utilities.

use tracing::{error, info, warn, Span};

use storyreel_models::StoryId;

/// Logger carrying a run's story id and the stage doing the logging.
#[derive(Debug, Clone)]
pub struct RunLogger {
    story_id: String,
    stage: String,
}

impl RunLogger {
    pub fn new(story_id: &StoryId, stage: &str) -> Self {
        Self {
            story_id: story_id.to_string(),
            stage: stage.to_string(),
        }
    }

    /// Logger for another stage of the same run.
    pub fn for_stage(&self, stage: &str) -> Self {
        Self {
            story_id: self.story_id.clone(),
            stage: stage.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            story_id = %self.story_id,
            stage = %self.stage,
            "Run started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            story_id = %self.story_id,
            stage = %self.stage,
            "Run progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            story_id = %self.story_id,
            stage = %self.stage,
            "Run warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            story_id = %self.story_id,
            stage = %self.stage,
            "Run error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            story_id = %self.story_id,
            stage = %self.stage,
            "Run completed: {}", message
        );
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Span to instrument a run's tasks with.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "run",
            story_id = %self.story_id,
            stage = %self.stage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_logger_creation() {
        let story_id = StoryId::new();
        let logger = RunLogger::new(&story_id, "extractor");

        assert_eq!(logger.story_id(), story_id.to_string());
        assert_eq!(logger.stage(), "extractor");
    }

    #[test]
    fn test_for_stage_keeps_story() {
        let logger = RunLogger::new(&StoryId::from("s-1"), "pipeline").for_stage("binder");
        assert_eq!(logger.story_id(), "s-1");
        assert_eq!(logger.stage(), "binder");
    }
}
