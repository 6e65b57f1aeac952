use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    cache::{GeneratedUnit, GenerationTarget, PregenerationCache},
    compaction::MemoryCompactor,
    config::Config,
    course::{Block, Course, CourseStatus, Curriculum, Outline, OutlineStatus, Step, Tier},
    error::{Error, GenerationError, Result},
    generator::{ContentGenerator, PromptContext},
    pregenerate::{PregenerationService, TriggerOutcome, generate_target, next_target},
    progress::{CompletionInput, CompletionOutcome, OutcomeKind, ProgressionEngine},
    utils::now,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSource {
    /// Generated earlier and not finished yet
    Existing,
    Cache,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextUnit {
    Step {
        step: Step,
        source: UnitSource,
    },
    Lesson {
        section_id: String,
        lesson_id: String,
        title: String,
        blocks: Vec<Block>,
        source: UnitSource,
    },
    /// Nothing is left to learn
    Finished,
}

/// Entry point for request handlers. Callers load a course, hand it in mutably and
/// persist it afterwards; calls for one course must not overlap.
pub struct Tutor<G> {
    generator: Arc<G>,
    cache: Arc<PregenerationCache>,
    pregeneration: PregenerationService<G>,
    compactor: MemoryCompactor<G>,
    engine: ProgressionEngine,
    timeout: Duration,
}

impl<G: ContentGenerator> Tutor<G> {
    /// Builds the tutor and starts the cache sweeper on the current tokio runtime.
    pub fn new(generator: Arc<G>, config: &Config) -> Self {
        let cache = Arc::new(PregenerationCache::new(config.cache.ttl()));
        cache.spawn_sweeper(config.cache.cleanup_interval());
        let timeout = config.pregeneration.timeout();
        Self {
            pregeneration: PregenerationService::new(cache.clone(), generator.clone(), timeout),
            compactor: MemoryCompactor::new(
                generator.clone(),
                config.progression.compaction_interval,
                timeout,
            ),
            engine: ProgressionEngine::new(config.progression.passing_score),
            generator,
            cache,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<PregenerationCache> {
        &self.cache
    }

    pub fn pregeneration(&self) -> &PregenerationService<G> {
        &self.pregeneration
    }

    pub fn engine(&self) -> &ProgressionEngine {
        &self.engine
    }

    pub fn compactor(&self) -> &MemoryCompactor<G> {
        &self.compactor
    }

    fn ensure_active(course: &Course) -> Result<()> {
        if !course.is_active() {
            return Err(Error::CourseNotActive(course.status));
        }
        Ok(())
    }

    /// The unit the learner should work on now.
    ///
    /// Unfinished units are returned as they are. Otherwise a cached unit generated
    /// for the same target is consumed, and only then the generator is called.
    pub async fn next_unit(&self, course: &mut Course, tier: Tier) -> Result<NextUnit> {
        if course.status == CourseStatus::Completed {
            return Ok(NextUnit::Finished);
        }
        Self::ensure_active(course)?;
        if matches!(course.curriculum, Curriculum::Outline(_))
            && course.outline_status != OutlineStatus::Ready
        {
            return Err(Error::OutlineNotReady(course.outline_status));
        }
        self.engine.start(course);
        if let Some(existing) = existing_unit(course) {
            return Ok(existing);
        }
        let Some(target) = next_target(course) else {
            return Ok(NextUnit::Finished);
        };
        let (unit, source) = match self.take_cached(course, &target) {
            Some(unit) => (unit, UnitSource::Cache),
            None => (self.generate_now(course, &target, tier).await?, UnitSource::Generated),
        };
        install(course, &target, unit, source)
    }

    fn take_cached(&self, course: &Course, target: &GenerationTarget) -> Option<GeneratedUnit> {
        let hit = self.cache.get(&course.id, &course.user_id)?;
        let created_at = self.cache.created_at(&course.id, &course.user_id);
        self.cache.delete(&course.id, &course.user_id);
        if hit.target != *target {
            debug!(
                "dropping cached unit of course {} generated for {:?}, need {:?}",
                course.id, hit.target, target
            );
            return None;
        }
        info!(
            "serving pregenerated unit for course {} (generated at {:?})",
            course.id, created_at
        );
        Some(hit.unit)
    }

    async fn generate_now(
        &self,
        course: &Course,
        target: &GenerationTarget,
        tier: Tier,
    ) -> Result<GeneratedUnit> {
        // a background run would only produce a duplicate
        self.pregeneration.cancel(&course.id, &course.user_id);
        info!(
            "no pregenerated unit for course {}, generating {:?}",
            course.id, target
        );
        let context = PromptContext::for_course(course);
        let unit = tokio::time::timeout(
            self.timeout,
            generate_target(self.generator.as_ref(), target, &context, tier),
        )
        .await
        .map_err(|_| GenerationError::Timeout(self.timeout))??;
        Ok(unit)
    }

    /// Records a completion, then updates memory and prepares the next unit.
    pub async fn complete_unit(
        &self,
        course: &mut Course,
        unit_id: &str,
        input: CompletionInput,
        tier: Tier,
    ) -> Result<CompletionOutcome> {
        Self::ensure_active(course)?;
        let outcome = self.engine.complete_unit(course, unit_id, &input);
        match outcome.kind {
            OutcomeKind::NotFound => return Err(Error::UnitNotFound(unit_id.to_string())),
            OutcomeKind::AlreadyCompleted => return Ok(outcome),
            _ => {}
        }
        match self.compactor.maybe_compact(course).await {
            Ok(true) => course.touch(),
            Ok(false) => {}
            Err(e) => warn!("memory compaction for course {} failed: {}", course.id, e),
        }
        self.after_progress(course, tier);
        Ok(outcome)
    }

    /// Re-scores a completed quiz unit.
    pub fn retry_unit(
        &self,
        course: &mut Course,
        unit_id: &str,
        score: f64,
        tier: Tier,
    ) -> Result<CompletionOutcome> {
        Self::ensure_active(course)?;
        let outcome = self.engine.retry_unit(course, unit_id, score);
        match outcome.kind {
            OutcomeKind::NotFound => Err(Error::UnitNotFound(unit_id.to_string())),
            OutcomeKind::Rescored => {
                self.after_progress(course, tier);
                Ok(outcome)
            }
            _ => Ok(outcome),
        }
    }

    /// Skips the lesson at the cursor. Returns false when there is nothing to skip.
    pub fn skip_lesson(&self, course: &mut Course, tier: Tier) -> Result<bool> {
        Self::ensure_active(course)?;
        if !self.engine.skip_current_lesson(course) {
            return Ok(false);
        }
        self.after_progress(course, tier);
        Ok(true)
    }

    fn after_progress(&self, course: &Course, tier: Tier) {
        if course.is_active() {
            self.pregeneration.trigger_pregeneration(course, tier);
        } else {
            self.clear(course);
        }
    }

    fn clear(&self, course: &Course) {
        self.pregeneration.cancel(&course.id, &course.user_id);
        self.cache.delete(&course.id, &course.user_id);
    }

    /// Generates the outline of a course created without one.
    ///
    /// A failure leaves the course in the failed state; nothing retries on its own.
    pub async fn build_outline(&self, course: &mut Course, tier: Tier) -> Result<TriggerOutcome> {
        Self::ensure_active(course)?;
        course.outline_status = OutlineStatus::Generating;
        let result = tokio::time::timeout(
            self.timeout,
            self.generator.generate_outline(&course.goal, tier),
        )
        .await
        .map_err(|_| GenerationError::Timeout(self.timeout))
        .and_then(|r| r);
        match result {
            Ok(outline) => Ok(self.outline_ready(course, outline, tier)),
            Err(e) => {
                self.outline_failed(course);
                Err(e.into())
            }
        }
    }

    /// Installs a finished outline, opens its first lesson and starts generating it.
    pub fn outline_ready(&self, course: &mut Course, outline: Outline, tier: Tier) -> TriggerOutcome {
        match &mut course.curriculum {
            Curriculum::Steps(curriculum) => {
                curriculum.outline = Some(outline);
                curriculum.position = None;
            }
            Curriculum::Outline(curriculum) => {
                curriculum.outline = outline;
                curriculum.position = None;
            }
        }
        course.outline_status = OutlineStatus::Ready;
        course.total_lessons = course
            .curriculum
            .outline()
            .map_or(course.total_lessons, Outline::lesson_count);
        self.engine.start(course);
        course.touch();
        info!(
            "outline of course {} ready with {} lessons",
            course.id, course.total_lessons
        );
        self.pregeneration.trigger_pregeneration(course, tier)
    }

    pub fn outline_failed(&self, course: &mut Course) {
        warn!("outline generation for course {} failed", course.id);
        course.outline_status = OutlineStatus::Failed;
        course.touch();
        self.clear(course);
    }

    pub fn archive(&self, course: &mut Course) -> Result<()> {
        if course.status != CourseStatus::Active {
            return Err(Error::InvalidTransition {
                from: course.status,
                to: CourseStatus::Archived,
            });
        }
        course.status = CourseStatus::Archived;
        course.archived_at = Some(now());
        course.touch();
        self.clear(course);
        Ok(())
    }

    pub fn unarchive(&self, course: &mut Course, tier: Tier) -> Result<TriggerOutcome> {
        if course.status != CourseStatus::Archived {
            return Err(Error::InvalidTransition {
                from: course.status,
                to: CourseStatus::Active,
            });
        }
        course.status = CourseStatus::Active;
        course.archived_at = None;
        course.touch();
        Ok(self.pregeneration.trigger_pregeneration(course, tier))
    }

    pub fn delete(&self, course: &mut Course) -> Result<()> {
        if course.status == CourseStatus::Deleted {
            return Err(Error::InvalidTransition {
                from: course.status,
                to: CourseStatus::Deleted,
            });
        }
        course.status = CourseStatus::Deleted;
        course.touch();
        self.clear(course);
        Ok(())
    }
}

fn existing_unit(course: &Course) -> Option<NextUnit> {
    match &course.curriculum {
        Curriculum::Steps(_) => course.current_step().map(|step| NextUnit::Step {
            step: step.clone(),
            source: UnitSource::Existing,
        }),
        Curriculum::Outline(curriculum) => {
            let position = curriculum.position.as_ref()?;
            let lesson = course.current_lesson()?;
            if lesson.status.is_finished() || lesson.blocks.is_empty() {
                return None;
            }
            Some(NextUnit::Lesson {
                section_id: position.section_id.clone(),
                lesson_id: lesson.id.clone(),
                title: lesson.title.clone(),
                blocks: lesson.blocks.clone(),
                source: UnitSource::Existing,
            })
        }
    }
}

fn install(
    course: &mut Course,
    target: &GenerationTarget,
    unit: GeneratedUnit,
    source: UnitSource,
) -> Result<NextUnit> {
    let next = match (&mut course.curriculum, target, unit) {
        (Curriculum::Steps(curriculum), GenerationTarget::NextStep { .. }, GeneratedUnit::Step(mut step)) => {
            step.index = curriculum.steps.len();
            curriculum.steps.push(step.clone());
            NextUnit::Step { step, source }
        }
        (
            Curriculum::Outline(curriculum),
            GenerationTarget::LessonBlocks {
                section_id,
                lesson_id,
            },
            GeneratedUnit::Blocks(blocks),
        ) => {
            let (si, li) = curriculum
                .outline
                .find_lesson(lesson_id)
                .ok_or_else(|| Error::UnitNotFound(lesson_id.clone()))?;
            let lesson = &mut curriculum.outline.sections[si].lessons[li];
            lesson.blocks = blocks;
            NextUnit::Lesson {
                section_id: section_id.clone(),
                lesson_id: lesson.id.clone(),
                title: lesson.title.clone(),
                blocks: lesson.blocks.clone(),
                source,
            }
        }
        (_, target, _) => {
            return Err(Error::Fatal(anyhow!(
                "generated unit does not fit course {} (target {:?})",
                course.id,
                target
            )));
        }
    };
    course.touch();
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::PregeneratedContent,
        course::StepKind,
        generator::ScriptedGenerator,
    };

    fn tutor(generator: &Arc<ScriptedGenerator>, compaction_interval: usize) -> Tutor<ScriptedGenerator> {
        let mut config = Config::default();
        config.progression.compaction_interval = compaction_interval;
        Tutor::new(generator.clone(), &config)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn answer(assessment: bool) -> CompletionInput {
        if assessment {
            CompletionInput::scored(90.0).with_answer("yes")
        } else {
            CompletionInput::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_unit_is_served_once() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::flat("c1", "u1", "rust", 5);
        tutor.pregeneration().trigger_pregeneration(&course, Tier::Free);
        settle().await;

        let NextUnit::Step { step, source } = tutor.next_unit(&mut course, Tier::Free).await.unwrap() else {
            panic!("expected a step");
        };
        assert_eq!(source, UnitSource::Cache);
        assert_eq!(step.index, 0);
        assert!(tutor.cache().is_empty());

        let NextUnit::Step { step: again, source } = tutor.next_unit(&mut course, Tier::Free).await.unwrap() else {
            panic!("expected a step");
        };
        assert_eq!(source, UnitSource::Existing);
        assert_eq!(again.id, step.id);
        assert_eq!(course.curriculum.steps().len(), 1);
        assert_eq!(generator.step_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_miss_generates_in_request() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::flat("c1", "u1", "rust", 5);
        let next = tutor.next_unit(&mut course, Tier::Free).await.unwrap();
        assert!(matches!(
            next,
            NextUnit::Step {
                source: UnitSource::Generated,
                ..
            }
        ));
        assert_eq!(generator.step_calls(), 1);
        assert_eq!(tutor.pregeneration().in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_unit_for_other_target_is_dropped() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::flat("c1", "u1", "rust", 5);
        tutor.cache().set(
            "c1",
            "u1",
            PregeneratedContent {
                target: GenerationTarget::NextStep {
                    index: 3,
                    lesson_id: None,
                },
                unit: GeneratedUnit::Step(Step::new(3, StepKind::Lesson, "t".into(), "t".into())),
            },
        );
        let NextUnit::Step { step, source } = tutor.next_unit(&mut course, Tier::Free).await.unwrap() else {
            panic!("expected a step");
        };
        assert_eq!(source, UnitSource::Generated);
        assert_eq!(step.index, 0);
        assert!(tutor.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_course_runs_to_completion() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 5);
        let mut course = Course::flat("c1", "u1", "rust", 6);
        let mut sources = Vec::new();
        for _ in 0..6 {
            let NextUnit::Step { step, source } = tutor.next_unit(&mut course, Tier::Free).await.unwrap() else {
                panic!("expected a step");
            };
            sources.push(source);
            let outcome = tutor
                .complete_unit(&mut course, &step.id, answer(step.kind.is_assessment()), Tier::Free)
                .await
                .unwrap();
            assert_eq!(outcome.kind, OutcomeKind::Recorded);
            settle().await;
        }
        assert_eq!(sources[0], UnitSource::Generated);
        assert!(sources[1..].iter().all(|s| *s == UnitSource::Cache));
        assert_eq!(course.status, CourseStatus::Completed);
        assert_eq!(course.progress, 100);
        assert_eq!(course.memory.compaction.as_ref().unwrap().last_step_index, 4);
        assert_eq!(generator.summary_calls(), 1);
        assert_eq!(generator.step_calls(), 6);
        assert!(tutor.cache().is_empty());
        assert_eq!(
            tutor.next_unit(&mut course, Tier::Free).await.unwrap(),
            NextUnit::Finished
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_compaction_does_not_fail_completion() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 1);
        let mut course = Course::flat("c1", "u1", "rust", 5);
        generator.fail_next_summaries(1);
        let NextUnit::Step { step, .. } = tutor.next_unit(&mut course, Tier::Free).await.unwrap() else {
            panic!("expected a step");
        };
        let outcome = tutor
            .complete_unit(&mut course, &step.id, CompletionInput::default(), Tier::Free)
            .await
            .unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Recorded);
        assert!(course.memory.compaction.is_none());
        assert_eq!(generator.summary_calls(), 1);
        settle().await;
        assert!(tutor.cache().has("c1", "u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_unit() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::flat("c1", "u1", "rust", 5);
        let err = tutor
            .complete_unit(&mut course, "missing", CompletionInput::default(), Tier::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnitNotFound(id) if id == "missing"));
        assert!(matches!(
            tutor.retry_unit(&mut course, "missing", 80.0, Tier::Free),
            Err(Error::UnitNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_errors_surface_without_cache() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::flat("c1", "u1", "rust", 5);
        generator.fail_next(1);
        let err = tutor.next_unit(&mut course, Tier::Free).await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::Api(_))));
        assert!(course.curriculum.steps().is_empty());

        let slow = Arc::new(ScriptedGenerator::new().with_delay(Duration::from_secs(120)));
        let tutor = Tutor::new(slow, &Config::default());
        let err = tutor.next_unit(&mut course, Tier::Free).await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_transitions() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::flat("c1", "u1", "rust", 5);
        tutor.pregeneration().trigger_pregeneration(&course, Tier::Free);
        settle().await;
        assert!(tutor.cache().has("c1", "u1"));

        tutor.archive(&mut course).unwrap();
        assert!(course.archived_at.is_some());
        assert!(tutor.cache().is_empty());
        assert!(matches!(
            tutor.next_unit(&mut course, Tier::Free).await,
            Err(Error::CourseNotActive(CourseStatus::Archived))
        ));
        assert!(matches!(
            tutor.archive(&mut course),
            Err(Error::InvalidTransition { .. })
        ));

        assert!(matches!(
            tutor.unarchive(&mut course, Tier::Free).unwrap(),
            TriggerOutcome::Spawned { .. }
        ));
        assert!(course.archived_at.is_none());

        tutor.delete(&mut course).unwrap();
        assert_eq!(course.status, CourseStatus::Deleted);
        assert_eq!(tutor.pregeneration().in_flight_count(), 0);
        settle().await;
        assert!(tutor.cache().is_empty());
        assert!(tutor.delete(&mut course).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outline_course_runs_to_completion() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::awaiting_outline("c1", "u1", "rust");
        assert!(matches!(
            tutor.next_unit(&mut course, Tier::Free).await,
            Err(Error::OutlineNotReady(OutlineStatus::Generating))
        ));

        let trigger = tutor.build_outline(&mut course, Tier::Pro).await.unwrap();
        assert!(matches!(trigger, TriggerOutcome::Spawned { .. }));
        assert_eq!(course.outline_status, OutlineStatus::Ready);
        assert_eq!(course.total_lessons, 4);
        settle().await;

        let mut lessons = Vec::new();
        loop {
            match tutor.next_unit(&mut course, Tier::Free).await.unwrap() {
                NextUnit::Lesson {
                    lesson_id,
                    blocks,
                    source,
                    ..
                } => {
                    lessons.push((lesson_id, source));
                    for block in blocks {
                        tutor
                            .complete_unit(&mut course, &block.id, answer(block.is_assessment()), Tier::Free)
                            .await
                            .unwrap();
                    }
                    settle().await;
                }
                NextUnit::Finished => break,
                other => panic!("unexpected unit {other:?}"),
            }
        }
        assert_eq!(
            lessons,
            vec![
                ("lesson-1-1".to_string(), UnitSource::Cache),
                ("lesson-1-2".to_string(), UnitSource::Cache),
                ("lesson-2-1".to_string(), UnitSource::Cache),
                ("lesson-2-2".to_string(), UnitSource::Cache),
            ]
        );
        assert_eq!(course.status, CourseStatus::Completed);
        assert_eq!(course.lessons_completed, 4);
        assert_eq!(course.progress, 100);
        assert_eq!(generator.block_calls(), 4);
        assert_eq!(generator.summary_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_outline_is_not_retried() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::awaiting_outline("c1", "u1", "rust");
        generator.fail_next(1);
        assert!(matches!(
            tutor.build_outline(&mut course, Tier::Free).await,
            Err(Error::Generation(_))
        ));
        assert_eq!(course.outline_status, OutlineStatus::Failed);
        assert_eq!(
            tutor.pregeneration().trigger_pregeneration(&course, Tier::Free),
            TriggerOutcome::NothingToGenerate
        );
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(generator.outline_calls(), 1);
        assert!(matches!(
            tutor.next_unit(&mut course, Tier::Free).await,
            Err(Error::OutlineNotReady(OutlineStatus::Failed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_lesson_moves_pregeneration() {
        let generator = Arc::new(ScriptedGenerator::new());
        let tutor = tutor(&generator, 10);
        let mut course = Course::awaiting_outline("c1", "u1", "rust");
        tutor.build_outline(&mut course, Tier::Free).await.unwrap();
        settle().await;
        assert!(tutor.skip_lesson(&mut course, Tier::Free).unwrap());
        settle().await;
        let NextUnit::Lesson {
            lesson_id, source, ..
        } = tutor.next_unit(&mut course, Tier::Free).await.unwrap()
        else {
            panic!("expected a lesson");
        };
        assert_eq!(lesson_id, "lesson-1-2");
        assert_eq!(source, UnitSource::Cache);
        assert_eq!(generator.block_calls(), 2);
    }
}
