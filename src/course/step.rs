use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::utils::{now, truncate_chars};

/// Generated step content longer than this is cut on creation.
pub const MAX_STEP_CONTENT_LENGTH: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Lesson,
    Quiz,
    #[serde(alias = "exercise")]
    Practice,
    Review,
    #[serde(other)]
    Other,
}

impl StepKind {
    /// Quiz steps gate course completion on their score.
    pub fn is_assessment(self) -> bool {
        matches!(self, StepKind::Quiz)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Lesson => "lesson",
            StepKind::Quiz => "quiz",
            StepKind::Practice => "practice",
            StepKind::Review => "review",
            StepKind::Other => "other",
        }
    }
}

/// A single unit of the flat step model.
///
/// Everything except the completion fields is fixed once the step has been generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub index: usize,
    pub kind: StepKind,
    pub topic: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "now", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Step {
    pub fn new(index: usize, kind: StepKind, topic: String, title: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            index,
            kind,
            topic,
            title,
            content: String::new(),
            question: None,
            options: Vec::new(),
            expected_answer: None,
            task: None,
            hints: Vec::new(),
            completed: false,
            completed_at: None,
            user_answer: None,
            score: None,
            attempts: 0,
            created_at: now(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.content = truncate_chars(&content, MAX_STEP_CONTENT_LENGTH).to_string();
        self
    }

    /// Sets the completion fields. Returns false when the step was already completed.
    pub fn mark_completed(
        &mut self,
        score: Option<f64>,
        user_answer: Option<String>,
        at: OffsetDateTime,
    ) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.completed_at = Some(at);
        self.score = score;
        self.attempts = 1;
        if user_answer.is_some() {
            self.user_answer = user_answer;
        }
        true
    }
}
