use time::OffsetDateTime;

use super::{CompletionInput, Cursor, LessonClose, ProgressModel, Recorded, Rescored, UnitSummary};
use crate::course::{Outline, Step, StepCurriculum};

impl From<&Step> for UnitSummary {
    fn from(step: &Step) -> Self {
        UnitSummary {
            id: step.id.clone(),
            kind: step.kind.as_str().to_string(),
            topic: step.topic.clone(),
            title: step.title.clone(),
            assessment: step.kind.is_assessment(),
            completed: step.completed,
            completed_at: step.completed_at,
            score: step.score,
            attempts: step.attempts,
        }
    }
}

impl ProgressModel for StepCurriculum {
    fn lesson_total(&self) -> Option<usize> {
        self.outline.as_ref().map(Outline::lesson_count)
    }

    fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.completed).count()
    }

    fn units(&self) -> Vec<UnitSummary> {
        self.steps.iter().map(UnitSummary::from).collect()
    }

    fn is_fully_completed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.completed)
    }

    fn record(&mut self, unit_id: &str, input: &CompletionInput, at: OffsetDateTime) -> Recorded {
        let Some(step) = self.steps.iter_mut().find(|s| s.id == unit_id) else {
            return Recorded::NotFound;
        };
        if !step.mark_completed(input.score, input.user_answer.clone(), at) {
            return Recorded::AlreadyCompleted;
        }
        Recorded::Recorded(UnitSummary::from(&*step))
    }

    fn rescore(&mut self, unit_id: &str, score: f64, _at: OffsetDateTime) -> Rescored {
        let Some(step) = self.steps.iter_mut().find(|s| s.id == unit_id) else {
            return Rescored::NotFound;
        };
        if !step.kind.is_assessment() || !step.completed {
            return Rescored::NotRetryable;
        }
        step.attempts += 1;
        step.score = Some(step.score.map_or(score, |s| s.max(score)));
        Rescored::Rescored(UnitSummary::from(&*step))
    }

    /// Each completed step consumes the lesson under the cursor.
    fn lesson_closed_by(&self, unit: &UnitSummary) -> Option<LessonClose> {
        let position = self.position.as_ref()?;
        let lesson = self
            .outline
            .as_ref()?
            .lesson(position.section_index, position.lesson_index)?;
        if lesson.status.is_finished() {
            return None;
        }
        Some(LessonClose {
            section_index: position.section_index,
            lesson_index: position.lesson_index,
            score: unit.score,
        })
    }

    fn cursor(&mut self) -> Option<Cursor<'_>> {
        let outline = self.outline.as_mut()?;
        Some(Cursor {
            outline,
            position: &mut self.position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{course::StepKind, utils::now};

    #[test]
    fn test_assessments_use_quiz_steps() {
        let mut curriculum = StepCurriculum::default();
        curriculum.steps = vec![
            Step::new(0, StepKind::Lesson, "rust".into(), "Intro".into()),
            Step::new(1, StepKind::Quiz, "rust".into(), "Check".into()),
        ];
        let ids: Vec<String> = curriculum.steps.iter().map(|s| s.id.clone()).collect();
        let at = now();
        curriculum.record(&ids[0], &CompletionInput::default(), at);
        curriculum.record(&ids[1], &CompletionInput::scored(65.0), at);
        assert!(curriculum.is_fully_completed());
        assert!(!curriculum.assessments_passed(70.0));
        assert!(matches!(curriculum.rescore(&ids[0], 90.0, at), Rescored::NotRetryable));
        let Rescored::Rescored(unit) = curriculum.rescore(&ids[1], 72.0, at) else {
            panic!("quiz not rescored");
        };
        assert_eq!(unit.attempts, 2);
        assert!(curriculum.assessments_passed(70.0));
        // a worse retry keeps the best score
        let Rescored::Rescored(unit) = curriculum.rescore(&ids[1], 40.0, at) else {
            panic!("quiz not rescored");
        };
        assert_eq!(unit.score, Some(72.0));
        assert_eq!(unit.attempts, 3);
    }

    #[test]
    fn test_no_outline_closes_nothing() {
        let mut curriculum = StepCurriculum::default();
        curriculum
            .steps
            .push(Step::new(0, StepKind::Lesson, "rust".into(), "Intro".into()));
        let id = curriculum.steps[0].id.clone();
        let Recorded::Recorded(unit) = curriculum.record(&id, &CompletionInput::default(), now())
        else {
            panic!("step not recorded");
        };
        assert!(curriculum.lesson_closed_by(&unit).is_none());
        assert!(curriculum.cursor().is_none());
        assert_eq!(curriculum.lesson_total(), None);
    }
}
