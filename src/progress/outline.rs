use time::OffsetDateTime;

use super::{CompletionInput, LessonClose, ProgressModel, Recorded, Rescored, UnitSummary};
use crate::course::{
    Block, BlockResult, Lesson, LessonStatus, OutlineCurriculum, Outline, OutlinePosition,
    SectionStatus,
};

/// Mutable view of an outline and the learner's position in it.
///
/// The position always points at a pending or in-progress lesson, except once every
/// lesson is finished, where it stays on the last one it held.
pub struct Cursor<'a> {
    pub outline: &'a mut Outline,
    pub position: &'a mut Option<OutlinePosition>,
}

impl Cursor<'_> {
    /// Places the cursor on the first open lesson if it has no position yet.
    pub fn start(&mut self) -> bool {
        if self.position.is_some() {
            return false;
        }
        self.move_to_next_open(None)
    }

    /// Finishes a lesson and rolls its section status up. No-op on finished lessons.
    pub fn close_lesson(
        &mut self,
        section_index: usize,
        lesson_index: usize,
        status: LessonStatus,
        score: Option<f64>,
        at: OffsetDateTime,
    ) -> bool {
        let Some(section) = self.outline.sections.get_mut(section_index) else {
            return false;
        };
        let Some(lesson) = section.lessons.get_mut(lesson_index) else {
            return false;
        };
        if lesson.status.is_finished() {
            return false;
        }
        lesson.status = status;
        if status == LessonStatus::Completed {
            lesson.score = score;
            lesson.completed_at = Some(at);
        }
        section.status = if section.all_lessons_finished() {
            SectionStatus::Completed
        } else {
            SectionStatus::InProgress
        };
        true
    }

    /// Leaves the cursor on an open lesson, otherwise moves it to the next open one,
    /// wrapping around to earlier lessons still unfinished.
    pub fn advance(&mut self) -> bool {
        let from = self
            .position
            .as_ref()
            .map(|p| (p.section_index, p.lesson_index));
        if let Some((si, li)) = from {
            if self
                .outline
                .lesson(si, li)
                .is_some_and(|l| !l.status.is_finished())
            {
                return false;
            }
        }
        self.move_to_next_open(from)
    }

    pub fn skip_current(&mut self, at: OffsetDateTime) -> bool {
        let Some((si, li)) = self
            .position
            .as_ref()
            .map(|p| (p.section_index, p.lesson_index))
        else {
            return false;
        };
        if !self.close_lesson(si, li, LessonStatus::Skipped, None, at) {
            return false;
        }
        self.advance();
        true
    }

    fn move_to_next_open(&mut self, from: Option<(usize, usize)>) -> bool {
        let order: Vec<(usize, usize)> = self.outline.lessons().map(|(si, li, _)| (si, li)).collect();
        let start = from
            .and_then(|f| order.iter().position(|p| *p == f))
            .map_or(0, |i| i + 1);
        let next = order[start..]
            .iter()
            .chain(order[..start].iter())
            .copied()
            .find(|&(si, li)| {
                self.outline
                    .lesson(si, li)
                    .is_some_and(|l| !l.status.is_finished())
            });
        let Some((si, li)) = next else {
            return false;
        };
        let section = &mut self.outline.sections[si];
        if section.status == SectionStatus::Pending {
            section.status = SectionStatus::InProgress;
        }
        let lesson = &mut section.lessons[li];
        if lesson.status == LessonStatus::Pending {
            lesson.status = LessonStatus::InProgress;
        }
        *self.position = self.outline.position_of(si, li);
        true
    }
}

fn block_unit(lesson: &Lesson, block: &Block) -> UnitSummary {
    let result = block.result.as_ref();
    UnitSummary {
        id: block.id.clone(),
        kind: block.kind().as_str().to_string(),
        topic: lesson.title.clone(),
        title: block.title.clone(),
        assessment: block.is_assessment(),
        completed: result.is_some(),
        completed_at: result.map(|r| r.completed_at),
        score: result.and_then(|r| r.score),
        attempts: result.map_or(0, |r| r.attempts),
    }
}

impl ProgressModel for OutlineCurriculum {
    fn lesson_total(&self) -> Option<usize> {
        Some(self.outline.lesson_count())
    }

    fn completed_count(&self) -> usize {
        self.outline.completed_lessons()
    }

    fn units(&self) -> Vec<UnitSummary> {
        self.outline
            .lessons()
            .flat_map(|(_, _, lesson)| lesson.blocks.iter().map(move |b| block_unit(lesson, b)))
            .collect()
    }

    fn is_fully_completed(&self) -> bool {
        self.outline.lesson_count() > 0
            && self
                .outline
                .lessons()
                .all(|(_, _, l)| l.status == LessonStatus::Completed)
    }

    fn record(&mut self, unit_id: &str, input: &CompletionInput, at: OffsetDateTime) -> Recorded {
        let Some((si, li, bi)) = self.outline.find_block(unit_id) else {
            return Recorded::NotFound;
        };
        let lesson = &mut self.outline.sections[si].lessons[li];
        let block = &mut lesson.blocks[bi];
        if block.is_completed() {
            return Recorded::AlreadyCompleted;
        }
        block.result = Some(BlockResult {
            completed_at: at,
            score: input.score,
            user_answer: input.user_answer.clone(),
            attempts: 1,
        });
        Recorded::Recorded(block_unit(lesson, &lesson.blocks[bi]))
    }

    fn rescore(&mut self, unit_id: &str, score: f64, _at: OffsetDateTime) -> Rescored {
        let Some((si, li, bi)) = self.outline.find_block(unit_id) else {
            return Rescored::NotFound;
        };
        let lesson = &mut self.outline.sections[si].lessons[li];
        let block = &mut lesson.blocks[bi];
        if !block.is_assessment() {
            return Rescored::NotRetryable;
        }
        let Some(result) = block.result.as_mut() else {
            return Rescored::NotRetryable;
        };
        result.attempts += 1;
        result.score = Some(result.score.map_or(score, |s| s.max(score)));
        if lesson.status == LessonStatus::Completed {
            lesson.score = Some(lesson.block_score());
        }
        Rescored::Rescored(block_unit(lesson, &lesson.blocks[bi]))
    }

    fn lesson_closed_by(&self, unit: &UnitSummary) -> Option<LessonClose> {
        let (si, li, _) = self.outline.find_block(&unit.id)?;
        let lesson = self.outline.lesson(si, li)?;
        if lesson.status.is_finished() || !lesson.all_blocks_completed() {
            return None;
        }
        Some(LessonClose {
            section_index: si,
            lesson_index: li,
            score: Some(lesson.block_score()),
        })
    }

    fn cursor(&mut self) -> Option<Cursor<'_>> {
        Some(Cursor {
            outline: &mut self.outline,
            position: &mut self.position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        course::{BlockBody, Section},
        utils::now,
    };

    fn outline(shape: &[usize]) -> Outline {
        Outline {
            title: "Rust".into(),
            description: String::new(),
            sections: shape
                .iter()
                .enumerate()
                .map(|(si, n)| {
                    Section::new(
                        format!("s{si}"),
                        format!("Section {si}"),
                        (0..*n)
                            .map(|li| Lesson::new(format!("s{si}l{li}"), format!("Lesson {si}.{li}")))
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    fn lesson_id(position: &Option<OutlinePosition>) -> &str {
        position.as_ref().map(|p| p.lesson_id.as_str()).unwrap_or("")
    }

    #[test]
    fn test_start_opens_first_lesson() {
        let mut outline = outline(&[2, 1]);
        let mut position = None;
        let mut cursor = Cursor {
            outline: &mut outline,
            position: &mut position,
        };
        assert!(cursor.start());
        assert!(!cursor.start());
        assert_eq!(lesson_id(&position), "s0l0");
        assert_eq!(outline.sections[0].status, SectionStatus::InProgress);
        assert_eq!(outline.sections[0].lessons[0].status, LessonStatus::InProgress);
        assert_eq!(outline.sections[1].status, SectionStatus::Pending);
    }

    #[test]
    fn test_advance_crosses_sections_and_stays_at_end() {
        let mut outline = outline(&[2, 1]);
        let mut position = None;
        let at = now();
        let mut cursor = Cursor {
            outline: &mut outline,
            position: &mut position,
        };
        cursor.start();
        assert!(cursor.close_lesson(0, 0, LessonStatus::Completed, Some(80.0), at));
        assert!(cursor.advance());
        assert_eq!(lesson_id(cursor.position), "s0l1");
        cursor.close_lesson(0, 1, LessonStatus::Completed, None, at);
        assert!(cursor.advance());
        assert_eq!(lesson_id(cursor.position), "s1l0");
        assert_eq!(cursor.outline.sections[0].status, SectionStatus::Completed);
        cursor.close_lesson(1, 0, LessonStatus::Completed, None, at);
        assert!(!cursor.advance());
        assert_eq!(lesson_id(&position), "s1l0");
        assert_eq!(outline.sections[1].status, SectionStatus::Completed);
    }

    #[test]
    fn test_advance_wraps_to_unfinished_lesson() {
        let mut outline = outline(&[3]);
        let mut position = None;
        let at = now();
        let mut cursor = Cursor {
            outline: &mut outline,
            position: &mut position,
        };
        cursor.start();
        // the learner finished the later lessons out of order
        cursor.close_lesson(0, 1, LessonStatus::Completed, None, at);
        cursor.close_lesson(0, 2, LessonStatus::Skipped, None, at);
        assert!(!cursor.advance());
        assert_eq!(lesson_id(cursor.position), "s0l0");
        assert!(cursor.skip_current(at));
        assert_eq!(lesson_id(&position), "s0l0");
        assert_eq!(outline.sections[0].status, SectionStatus::Completed);
    }

    #[test]
    fn test_closing_finished_lesson_is_noop() {
        let mut outline = outline(&[1]);
        let mut position = None;
        let at = now();
        let mut cursor = Cursor {
            outline: &mut outline,
            position: &mut position,
        };
        assert!(cursor.close_lesson(0, 0, LessonStatus::Completed, Some(90.0), at));
        assert!(!cursor.close_lesson(0, 0, LessonStatus::Skipped, None, at));
        assert_eq!(outline.sections[0].lessons[0].score, Some(90.0));
    }

    #[test]
    fn test_lesson_closes_when_all_blocks_done() {
        let mut curriculum = OutlineCurriculum {
            outline: outline(&[1]),
            position: None,
        };
        curriculum.outline.sections[0].lessons[0].blocks = vec![
            Block::new(0, "Intro".into(), BlockBody::Text { markdown: "hi".into() }),
            Block::new(
                1,
                "Check".into(),
                BlockBody::Question {
                    text: "?".into(),
                    options: vec![],
                    correct_answer: "a".into(),
                    explanation: None,
                },
            ),
        ];
        let ids: Vec<String> = curriculum.outline.sections[0].lessons[0]
            .blocks
            .iter()
            .map(|b| b.id.clone())
            .collect();
        let at = now();
        let Recorded::Recorded(first) = curriculum.record(&ids[0], &CompletionInput::default(), at)
        else {
            panic!("first block not recorded");
        };
        assert!(curriculum.lesson_closed_by(&first).is_none());
        let Recorded::Recorded(second) = curriculum.record(&ids[1], &CompletionInput::scored(60.0), at)
        else {
            panic!("second block not recorded");
        };
        assert!(second.assessment);
        assert_eq!(second.topic, "Lesson 0.0");
        let close = curriculum.lesson_closed_by(&second).unwrap();
        assert_eq!(close.score, Some(60.0));
        assert!(matches!(
            curriculum.record(&ids[1], &CompletionInput::scored(100.0), at),
            Recorded::AlreadyCompleted
        ));
        assert!(matches!(curriculum.rescore(&ids[0], 100.0, at), Rescored::NotRetryable));
    }
}
