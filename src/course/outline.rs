use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::block::Block;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl LessonStatus {
    /// Completed and skipped lessons are never revisited by the cursor.
    pub fn is_finished(self) -> bool {
        matches!(self, LessonStatus::Completed | LessonStatus::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: LessonStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl Lesson {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: LessonStatus::Pending,
            blocks: Vec::new(),
            score: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mean of the scored blocks, 100 when no block carries a score
    pub fn block_score(&self) -> f64 {
        let scores: Vec<f64> = self.blocks.iter().filter_map(Block::score).collect();
        if scores.is_empty() {
            100.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    pub fn all_blocks_completed(&self) -> bool {
        !self.blocks.is_empty() && self.blocks.iter().all(Block::is_completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: SectionStatus,
    pub lessons: Vec<Lesson>,
}

impl Section {
    pub fn new(id: impl Into<String>, title: impl Into<String>, lessons: Vec<Lesson>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: SectionStatus::Pending,
            lessons,
        }
    }

    pub fn all_lessons_finished(&self) -> bool {
        self.lessons.iter().all(|l| l.status.is_finished())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub sections: Vec<Section>,
}

/// The learner's cursor inside an outline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutlinePosition {
    pub section_index: usize,
    pub lesson_index: usize,
    pub section_id: String,
    pub lesson_id: String,
}

impl Outline {
    pub fn lesson_count(&self) -> usize {
        self.sections.iter().map(|s| s.lessons.len()).sum()
    }

    pub fn completed_lessons(&self) -> usize {
        self.lessons()
            .filter(|(_, _, l)| l.status == LessonStatus::Completed)
            .count()
    }

    /// All lessons with their section and lesson index, in curriculum order
    pub fn lessons(&self) -> impl Iterator<Item = (usize, usize, &Lesson)> {
        self.sections
            .iter()
            .enumerate()
            .flat_map(|(si, s)| s.lessons.iter().enumerate().map(move |(li, l)| (si, li, l)))
    }

    pub fn lesson(&self, section_index: usize, lesson_index: usize) -> Option<&Lesson> {
        self.sections.get(section_index)?.lessons.get(lesson_index)
    }

    pub fn lesson_mut(&mut self, section_index: usize, lesson_index: usize) -> Option<&mut Lesson> {
        self.sections
            .get_mut(section_index)?
            .lessons
            .get_mut(lesson_index)
    }

    pub fn find_lesson(&self, lesson_id: &str) -> Option<(usize, usize)> {
        self.lessons()
            .find(|(_, _, l)| l.id == lesson_id)
            .map(|(si, li, _)| (si, li))
    }

    /// Locates a block by id as `(section, lesson, block)` indices
    pub fn find_block(&self, block_id: &str) -> Option<(usize, usize, usize)> {
        self.lessons().find_map(|(si, li, l)| {
            l.blocks
                .iter()
                .position(|b| b.id == block_id)
                .map(|bi| (si, li, bi))
        })
    }

    pub fn position_of(&self, section_index: usize, lesson_index: usize) -> Option<OutlinePosition> {
        let section = self.sections.get(section_index)?;
        let lesson = section.lessons.get(lesson_index)?;
        Some(OutlinePosition {
            section_index,
            lesson_index,
            section_id: section.id.clone(),
            lesson_id: lesson.id.clone(),
        })
    }

    pub fn current_lesson(&self, position: Option<&OutlinePosition>) -> Option<&Lesson> {
        let position = position?;
        self.lesson(position.section_index, position.lesson_index)
    }
}
