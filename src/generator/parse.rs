use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    course::{Block, BlockBody, Lesson, Outline, Section, Step, StepKind},
    error::GenerationError,
};

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*\n?(.*?)\s*```\s*$").unwrap()
});

/// Removes a markdown code fence wrapped around a model answer.
pub fn strip_code_fences(content: &str) -> &str {
    match CODE_FENCE.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => content.trim(),
    }
}

pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, GenerationError> {
    serde_json::from_str(strip_code_fences(content)).map_err(|e| GenerationError::MalformedResponse {
        reason: e.to_string(),
        content: content.to_string(),
    })
}

fn malformed(reason: &str, draft: &impl Serialize) -> GenerationError {
    GenerationError::MalformedResponse {
        reason: reason.to_string(),
        content: serde_json::to_string(draft).unwrap_or_default(),
    }
}

/// One learning step
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepDraft {
    /// One of lesson, quiz, practice, review
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// The topic the step covers, a few words
    pub topic: String,
    pub title: String,
    /// Markdown body of the step
    #[serde(default)]
    pub content: String,
    /// Quiz question
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Quiz answer options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
    /// Practice task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl StepDraft {
    pub fn into_step(self, index: usize) -> Result<Step, GenerationError> {
        if self.title.trim().is_empty() {
            return Err(malformed("step has no title", &self));
        }
        if self.kind == StepKind::Quiz && self.question.is_none() {
            return Err(malformed("quiz step has no question", &self));
        }
        let mut step = Step::new(index, self.kind, self.topic, self.title).with_content(self.content);
        step.question = self.question;
        step.options = self.options;
        step.expected_answer = self.expected_answer;
        step.task = self.task;
        step.hints = self.hints;
        Ok(step)
    }
}

/// One content block of a lesson
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlockDraft {
    pub title: String,
    /// What this block teaches within the lesson
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub content: BlockBody,
}

/// The blocks of a lesson, in reading order
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LessonBlocksDraft {
    pub blocks: Vec<BlockDraft>,
}

impl LessonBlocksDraft {
    pub fn into_blocks(self) -> Result<Vec<Block>, GenerationError> {
        if self.blocks.is_empty() {
            return Err(malformed("lesson has no blocks", &self));
        }
        Ok(self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(order, draft)| {
                let mut block = Block::new(order, draft.title, draft.content);
                block.purpose = draft.purpose;
                block
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LessonDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SectionDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub lessons: Vec<LessonDraft>,
}

/// A course outline
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutlineDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub sections: Vec<SectionDraft>,
}

impl OutlineDraft {
    pub fn into_outline(self) -> Result<Outline, GenerationError> {
        if self.sections.iter().all(|s| s.lessons.is_empty()) {
            return Err(malformed("outline has no lessons", &self));
        }
        let sections = self
            .sections
            .into_iter()
            .filter(|s| !s.lessons.is_empty())
            .map(|s| {
                let lessons = s
                    .lessons
                    .into_iter()
                    .map(|l| {
                        Lesson::new(uuid::Uuid::new_v4().to_string(), l.title)
                            .with_description(l.description)
                    })
                    .collect();
                let mut section = Section::new(uuid::Uuid::new_v4().to_string(), s.title, lessons);
                section.description = s.description;
                section
            })
            .collect();
        Ok(Outline {
            title: self.title,
            description: self.description,
            sections,
        })
    }
}
