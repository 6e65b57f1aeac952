use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Code,
    Question,
    Task,
    Flashcard,
    Summary,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Code => "code",
            BlockKind::Question => "question",
            BlockKind::Task => "task",
            BlockKind::Flashcard => "flashcard",
            BlockKind::Summary => "summary",
        }
    }
}

/// The content of a block, one shape per block kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockBody {
    /// Explanatory markdown
    Text { markdown: String },
    /// A code example
    Code {
        language: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    /// A knowledge check; `correct_answer` is an option text or a free-form answer
    Question {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
        correct_answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    /// A hands-on task
    Task {
        instruction: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        hints: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        solution: Option<String>,
    },
    /// A flashcard for spaced repetition
    Flashcard { front: String, back: String },
    /// Key takeaways of the lesson
    Summary { key_points: Vec<String> },
}

impl BlockBody {
    pub fn kind(&self) -> BlockKind {
        match self {
            BlockBody::Text { .. } => BlockKind::Text,
            BlockBody::Code { .. } => BlockKind::Code,
            BlockBody::Question { .. } => BlockKind::Question,
            BlockBody::Task { .. } => BlockKind::Task,
            BlockBody::Flashcard { .. } => BlockKind::Flashcard,
            BlockBody::Summary { .. } => BlockKind::Summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockResult {
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

/// A content block inside an outline lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub order: usize,
    pub title: String,
    /// What the block is meant to teach within its lesson
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub body: BlockBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BlockResult>,
}

impl Block {
    pub fn new(order: usize, title: String, body: BlockBody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order,
            title,
            purpose: None,
            body,
            result: None,
        }
    }

    pub fn kind(&self) -> BlockKind {
        self.body.kind()
    }

    pub fn is_completed(&self) -> bool {
        self.result.is_some()
    }

    pub fn is_assessment(&self) -> bool {
        self.kind() == BlockKind::Question
    }

    pub fn score(&self) -> Option<f64> {
        self.result.as_ref().and_then(|r| r.score)
    }
}
