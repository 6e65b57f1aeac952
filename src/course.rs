pub mod block;
pub mod memory;
pub mod outline;
pub mod step;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use block::{Block, BlockBody, BlockKind, BlockResult};
pub use memory::{Compaction, Memory, TopicMemory};
pub use outline::{Lesson, LessonStatus, Outline, OutlinePosition, Section, SectionStatus};
pub use step::{Step, StepKind};

use crate::{progress::ProgressModel, utils::now};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    #[default]
    Active,
    Completed,
    Archived,
    Deleted,
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CourseStatus::Active => "active",
            CourseStatus::Completed => "completed",
            CourseStatus::Archived => "archived",
            CourseStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlineStatus {
    Generating,
    #[default]
    Ready,
    Failed,
}

impl fmt::Display for OutlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutlineStatus::Generating => "generating",
            OutlineStatus::Ready => "ready",
            OutlineStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Subscription tier, only used to pick the LLM model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

impl FromStr for Tier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Flat generated steps, optionally walking an outline one lesson per step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepCurriculum {
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<Outline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<OutlinePosition>,
}

/// Sections of lessons made of content blocks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineCurriculum {
    pub outline: Outline,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<OutlinePosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Curriculum {
    Steps(StepCurriculum),
    Outline(OutlineCurriculum),
}

impl Curriculum {
    pub fn model(&self) -> &dyn ProgressModel {
        match self {
            Curriculum::Steps(c) => c,
            Curriculum::Outline(c) => c,
        }
    }

    pub fn model_mut(&mut self) -> &mut dyn ProgressModel {
        match self {
            Curriculum::Steps(c) => c,
            Curriculum::Outline(c) => c,
        }
    }

    pub fn outline(&self) -> Option<&Outline> {
        match self {
            Curriculum::Steps(c) => c.outline.as_ref(),
            Curriculum::Outline(c) => Some(&c.outline),
        }
    }

    pub fn position(&self) -> Option<&OutlinePosition> {
        match self {
            Curriculum::Steps(c) => c.position.as_ref(),
            Curriculum::Outline(c) => c.position.as_ref(),
        }
    }

    pub fn steps(&self) -> &[Step] {
        match self {
            Curriculum::Steps(c) => &c.steps,
            Curriculum::Outline(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub user_id: String,
    pub goal: String,
    #[serde(default)]
    pub status: CourseStatus,
    #[serde(default)]
    pub outline_status: OutlineStatus,
    /// 0 ..= 100
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub lessons_completed: usize,
    #[serde(default)]
    pub total_lessons: usize,
    pub curriculum: Curriculum,
    #[serde(default)]
    pub memory: Memory,
    #[serde(default = "now", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default = "now", with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub archived_at: Option<OffsetDateTime>,
}

impl Course {
    fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        goal: impl Into<String>,
        curriculum: Curriculum,
    ) -> Self {
        let at = now();
        let total_lessons = curriculum.outline().map_or(0, Outline::lesson_count);
        Self {
            id: id.into(),
            user_id: user_id.into(),
            goal: goal.into(),
            status: CourseStatus::Active,
            outline_status: OutlineStatus::Ready,
            progress: 0,
            lessons_completed: 0,
            total_lessons,
            curriculum,
            memory: Memory::default(),
            created_at: at,
            updated_at: at,
            completed_at: None,
            archived_at: None,
        }
    }

    /// A step course without an outline; `total_lessons` is the planned step count.
    pub fn flat(
        id: impl Into<String>,
        user_id: impl Into<String>,
        goal: impl Into<String>,
        total_lessons: usize,
    ) -> Self {
        let mut course = Self::new(id, user_id, goal, Curriculum::Steps(StepCurriculum::default()));
        course.total_lessons = total_lessons;
        course
    }

    /// A step course where each completed step consumes the lesson at the cursor
    pub fn stepped_outline(
        id: impl Into<String>,
        user_id: impl Into<String>,
        goal: impl Into<String>,
        outline: Outline,
    ) -> Self {
        Self::new(
            id,
            user_id,
            goal,
            Curriculum::Steps(StepCurriculum {
                steps: Vec::new(),
                outline: Some(outline),
                position: None,
            }),
        )
    }

    pub fn outlined(
        id: impl Into<String>,
        user_id: impl Into<String>,
        goal: impl Into<String>,
        outline: Outline,
    ) -> Self {
        Self::new(
            id,
            user_id,
            goal,
            Curriculum::Outline(OutlineCurriculum {
                outline,
                position: None,
            }),
        )
    }

    /// A block course whose outline is still being generated
    pub fn awaiting_outline(
        id: impl Into<String>,
        user_id: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        let mut course = Self::outlined(id, user_id, goal, Outline::default());
        course.outline_status = OutlineStatus::Generating;
        course
    }

    pub fn is_active(&self) -> bool {
        self.status == CourseStatus::Active
    }

    pub fn position(&self) -> Option<&OutlinePosition> {
        self.curriculum.position()
    }

    pub fn current_lesson(&self) -> Option<&Lesson> {
        self.curriculum.outline()?.current_lesson(self.position())
    }

    /// The first step not yet completed
    pub fn current_step(&self) -> Option<&Step> {
        self.curriculum.steps().iter().find(|s| !s.completed)
    }

    pub fn touch(&mut self) {
        self.updated_at = now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curriculum_is_tagged() {
        let outline = Outline {
            title: "Rust".into(),
            description: String::new(),
            sections: vec![Section::new("s1", "Basics", vec![Lesson::new("l1", "Ownership")])],
        };
        let course = Course::outlined("c1", "u1", "learn rust", outline);
        assert_eq!(course.total_lessons, 1);
        let json = serde_json::to_value(&course).unwrap();
        assert_eq!(json["curriculum"]["model"], "outline");
        let back: Course = serde_json::from_value(json).unwrap();
        assert_eq!(back.curriculum, course.curriculum);
        assert_eq!(back.outline_status, OutlineStatus::Ready);
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert!("gold".parse::<Tier>().is_err());
    }
}
