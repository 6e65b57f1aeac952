pub mod outline;
pub mod steps;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

pub use outline::Cursor;

use crate::{
    course::{Course, CourseStatus, LessonStatus},
    utils::now,
};

/// A completable unit (a step or a block) as seen by progression and memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub id: String,
    pub kind: String,
    pub topic: String,
    pub title: String,
    pub assessment: bool,
    pub completed: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub score: Option<f64>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionInput {
    pub score: Option<f64>,
    pub user_answer: Option<String>,
}

impl CompletionInput {
    pub fn scored(score: f64) -> Self {
        Self {
            score: Some(score),
            user_answer: None,
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.user_answer = Some(answer.into());
        self
    }

    /// Scores are percentages; anything else is dropped or clamped.
    fn normalized_score(&self) -> Option<f64> {
        self.score.filter(|s| s.is_finite()).map(|s| s.clamp(0.0, 100.0))
    }
}

pub enum Recorded {
    NotFound,
    AlreadyCompleted,
    Recorded(UnitSummary),
}

pub enum Rescored {
    NotFound,
    NotRetryable,
    Rescored(UnitSummary),
}

/// A lesson that a completed unit finished
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LessonClose {
    pub section_index: usize,
    pub lesson_index: usize,
    pub score: Option<f64>,
}

/// One curriculum shape driven by the engine.
pub trait ProgressModel {
    /// Lessons progress is measured against, when the shape defines them
    fn lesson_total(&self) -> Option<usize>;
    /// Lessons (or steps, without an outline) counted as done for progress
    fn completed_count(&self) -> usize;
    /// Every unit in curriculum order
    fn units(&self) -> Vec<UnitSummary>;
    fn is_fully_completed(&self) -> bool;
    fn record(&mut self, unit_id: &str, input: &CompletionInput, at: OffsetDateTime) -> Recorded;
    /// Re-scores a completed assessment unit, keeping the best score.
    fn rescore(&mut self, unit_id: &str, score: f64, at: OffsetDateTime) -> Rescored;
    /// The lesson a freshly completed unit finishes, if any
    fn lesson_closed_by(&self, unit: &UnitSummary) -> Option<LessonClose>;
    fn cursor(&mut self) -> Option<Cursor<'_>>;

    fn completed_unit_count(&self) -> usize {
        self.units().iter().filter(|u| u.completed).count()
    }

    fn completed_units(&self) -> Vec<UnitSummary> {
        let mut units: Vec<_> = self.units().into_iter().filter(|u| u.completed).collect();
        units.sort_by_key(|u| u.completed_at);
        units
    }

    fn assessments_passed(&self, passing_score: f64) -> bool {
        self.units()
            .iter()
            .filter(|u| u.assessment)
            .all(|u| u.score.is_some_and(|s| s >= passing_score))
    }
}

pub fn calculate_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (completed * 100 / total).min(100) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Recorded,
    AlreadyCompleted,
    NotFound,
    Rescored,
    NotRetryable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub kind: OutcomeKind,
    pub unit: Option<UnitSummary>,
    pub progress: u8,
    pub lessons_completed: usize,
    pub total_lessons: usize,
    /// The outline lessons or the cursor changed
    pub outline_modified: bool,
    /// This call moved the course to completed
    pub course_completed: bool,
}

/// Pure state machine over a course's curriculum. Callers gate on course status.
#[derive(Debug, Clone)]
pub struct ProgressionEngine {
    passing_score: f64,
}

impl Default for ProgressionEngine {
    fn default() -> Self {
        Self::new(70.0)
    }
}

impl ProgressionEngine {
    pub fn new(passing_score: f64) -> Self {
        Self { passing_score }
    }

    pub fn passing_score(&self) -> f64 {
        self.passing_score
    }

    /// Places the cursor on the first open lesson once an outline exists.
    pub fn start(&self, course: &mut Course) -> bool {
        let started = course
            .curriculum
            .model_mut()
            .cursor()
            .is_some_and(|mut cursor| cursor.start());
        if started {
            self.refresh(course);
        }
        started
    }

    pub fn complete_unit(
        &self,
        course: &mut Course,
        unit_id: &str,
        input: &CompletionInput,
    ) -> CompletionOutcome {
        let at = now();
        let input = CompletionInput {
            score: input.normalized_score(),
            user_answer: input.user_answer.clone(),
        };
        let unit = match course.curriculum.model_mut().record(unit_id, &input, at) {
            Recorded::NotFound => return self.snapshot(course, OutcomeKind::NotFound, None),
            Recorded::AlreadyCompleted => {
                return self.snapshot(course, OutcomeKind::AlreadyCompleted, None);
            }
            Recorded::Recorded(unit) => unit,
        };
        course.memory.record_completion(&unit.topic, unit.score, at);
        let outline_modified = self.advance_outline_position(course, &unit);
        self.refresh(course);
        let course_completed = self.check_completion(course, at);
        course.updated_at = at;
        CompletionOutcome {
            outline_modified,
            course_completed,
            ..self.snapshot(course, OutcomeKind::Recorded, Some(unit))
        }
    }

    /// Closes the lesson `unit` finished and moves the cursor on.
    /// Returns whether the outline changed.
    pub fn advance_outline_position(&self, course: &mut Course, unit: &UnitSummary) -> bool {
        let at = now();
        let model = course.curriculum.model_mut();
        let started = model.cursor().is_some_and(|mut cursor| cursor.start());
        let Some(close) = model.lesson_closed_by(unit) else {
            return started;
        };
        let Some(mut cursor) = model.cursor() else {
            return started;
        };
        let closed = cursor.close_lesson(
            close.section_index,
            close.lesson_index,
            LessonStatus::Completed,
            close.score,
            at,
        );
        let moved = cursor.advance();
        started || closed || moved
    }

    /// Re-scores a completed quiz unit and re-evaluates auto-completion.
    pub fn retry_unit(&self, course: &mut Course, unit_id: &str, score: f64) -> CompletionOutcome {
        let at = now();
        let Some(score) = CompletionInput::scored(score).normalized_score() else {
            return self.snapshot(course, OutcomeKind::NotRetryable, None);
        };
        let unit = match course.curriculum.model_mut().rescore(unit_id, score, at) {
            Rescored::NotFound => return self.snapshot(course, OutcomeKind::NotFound, None),
            Rescored::NotRetryable => {
                return self.snapshot(course, OutcomeKind::NotRetryable, None);
            }
            Rescored::Rescored(unit) => unit,
        };
        course.memory.record_completion(&unit.topic, Some(score), at);
        self.refresh(course);
        let course_completed = self.check_completion(course, at);
        course.updated_at = at;
        CompletionOutcome {
            course_completed,
            ..self.snapshot(course, OutcomeKind::Rescored, Some(unit))
        }
    }

    /// Marks the lesson at the cursor skipped and advances.
    pub fn skip_current_lesson(&self, course: &mut Course) -> bool {
        let skipped = course
            .curriculum
            .model_mut()
            .cursor()
            .is_some_and(|mut cursor| cursor.skip_current(now()));
        if skipped {
            self.refresh(course);
            course.touch();
        }
        skipped
    }

    /// All units done and every quiz unit at or above the passing score
    pub fn is_ready_for_completion(&self, course: &Course) -> bool {
        let model = course.curriculum.model();
        course.progress == 100
            && model.is_fully_completed()
            && model.assessments_passed(self.passing_score)
    }

    fn check_completion(&self, course: &mut Course, at: OffsetDateTime) -> bool {
        if course.status != CourseStatus::Active || !self.is_ready_for_completion(course) {
            return false;
        }
        course.status = CourseStatus::Completed;
        course.completed_at = Some(at);
        info!("course {} completed by user {}", course.id, course.user_id);
        true
    }

    fn refresh(&self, course: &mut Course) {
        let model = course.curriculum.model();
        if let Some(total) = model.lesson_total() {
            course.total_lessons = total;
        }
        course.lessons_completed = model.completed_count();
        let progress = calculate_progress(course.lessons_completed, course.total_lessons);
        course.progress = course.progress.max(progress);
    }

    fn snapshot(
        &self,
        course: &Course,
        kind: OutcomeKind,
        unit: Option<UnitSummary>,
    ) -> CompletionOutcome {
        CompletionOutcome {
            kind,
            unit,
            progress: course.progress,
            lessons_completed: course.lessons_completed,
            total_lessons: course.total_lessons,
            outline_modified: false,
            course_completed: false,
        }
    }
}
