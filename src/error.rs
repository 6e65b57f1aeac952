use std::time::Duration;

use crate::course::{CourseStatus, OutlineStatus};

/// Failures of a single content generation call
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("LLM client is not configured: {0}")]
    NotConfigured(String),
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("LLM API error: {0}")]
    Api(String),
    #[error("Malformed LLM response: {reason}")]
    MalformedResponse { reason: String, content: String },
    #[error("No completion returned from LLM")]
    EmptyCompletion,
}

impl From<async_openai::error::OpenAIError> for GenerationError {
    fn from(e: async_openai::error::OpenAIError) -> Self {
        GenerationError::Api(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Course is {0}, only active courses can progress")]
    CourseNotActive(CourseStatus),
    #[error("Course outline is not ready: {0}")]
    OutlineNotReady(OutlineStatus),
    #[error("Unit not found: {0}")]
    UnitNotFound(String),
    #[error("Cannot move course from {from} to {to}")]
    InvalidTransition { from: CourseStatus, to: CourseStatus },
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("Invalid config: {0}")]
    Config(String),
    #[error("Fatal error: {0}")]
    Fatal(anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
