use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use crate::{
    cache::{CacheKey, GeneratedUnit, GenerationTarget, PregeneratedContent, PregenerationCache},
    course::{Course, Curriculum, OutlineStatus, Tier},
    error::GenerationError,
    generator::{ContentGenerator, PromptContext},
};

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// The unit the learner will need next, if it has not been generated yet
pub fn next_target(course: &Course) -> Option<GenerationTarget> {
    match &course.curriculum {
        Curriculum::Steps(curriculum) => {
            if curriculum.steps.iter().any(|s| !s.completed) {
                return None;
            }
            let lesson_id = course
                .current_lesson()
                .filter(|l| !l.status.is_finished())
                .map(|l| l.id.clone());
            Some(GenerationTarget::NextStep {
                index: curriculum.steps.len(),
                lesson_id,
            })
        }
        Curriculum::Outline(curriculum) => {
            if course.outline_status != OutlineStatus::Ready {
                return None;
            }
            let position = curriculum.position.as_ref()?;
            let lesson = curriculum
                .outline
                .lesson(position.section_index, position.lesson_index)?;
            if lesson.status.is_finished() || !lesson.blocks.is_empty() {
                return None;
            }
            Some(GenerationTarget::LessonBlocks {
                section_id: position.section_id.clone(),
                lesson_id: position.lesson_id.clone(),
            })
        }
    }
}

/// Runs one generation call for `target`.
pub async fn generate_target<G: ContentGenerator>(
    generator: &G,
    target: &GenerationTarget,
    context: &PromptContext,
    tier: Tier,
) -> Result<GeneratedUnit, GenerationError> {
    match target {
        GenerationTarget::NextStep { index, .. } => {
            let mut step = generator.generate_step(context, tier).await?;
            step.index = *index;
            Ok(GeneratedUnit::Step(step))
        }
        GenerationTarget::LessonBlocks { .. } => {
            let blocks = generator.generate_blocks(context, tier).await?;
            Ok(GeneratedUnit::Blocks(blocks))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Spawned {
        version: u64,
        superseded: Option<u64>,
    },
    AlreadyCached,
    AlreadyGenerating,
    NothingToGenerate,
    Inactive,
}

#[derive(Debug)]
struct InFlight {
    version: u64,
    target: GenerationTarget,
    abort: AbortHandle,
}

/// Generates the learner's next unit in the background and parks it in the cache.
pub struct PregenerationService<G> {
    cache: Arc<PregenerationCache>,
    generator: Arc<G>,
    in_flight: Arc<DashMap<CacheKey, InFlight>>,
    timeout: Duration,
}

impl<G: ContentGenerator> PregenerationService<G> {
    pub fn new(cache: Arc<PregenerationCache>, generator: Arc<G>, timeout: Duration) -> Self {
        Self {
            cache,
            generator,
            in_flight: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<PregenerationCache> {
        &self.cache
    }

    /// Starts generating the course's next unit unless it is cached or already
    /// being generated. Returns at once.
    pub fn trigger_pregeneration(&self, course: &Course, tier: Tier) -> TriggerOutcome {
        if !course.is_active() {
            return TriggerOutcome::Inactive;
        }
        let Some(target) = next_target(course) else {
            return TriggerOutcome::NothingToGenerate;
        };
        if self
            .cache
            .get(&course.id, &course.user_id)
            .is_some_and(|c| c.target == target)
        {
            debug!("next unit of course {} is already cached", course.id);
            return TriggerOutcome::AlreadyCached;
        }
        let key = CacheKey::new(&course.id, &course.user_id);
        let context = PromptContext::for_course(course);
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.target == target && !current.abort.is_finished() {
                    debug!("next unit of course {} is already generating", course.id);
                    return TriggerOutcome::AlreadyGenerating;
                }
                current.abort.abort();
                let previous = current.version;
                let version = self.cache.next_version();
                let abort = self.spawn(key, target.clone(), context, tier, version);
                occupied.insert(InFlight {
                    version,
                    target,
                    abort,
                });
                info!(
                    "pregeneration {} for course {} supersedes {}",
                    version, course.id, previous
                );
                TriggerOutcome::Spawned {
                    version,
                    superseded: Some(previous),
                }
            }
            Entry::Vacant(vacant) => {
                let version = self.cache.next_version();
                let abort = self.spawn(key, target.clone(), context, tier, version);
                vacant.insert(InFlight {
                    version,
                    target,
                    abort,
                });
                info!("pregeneration {} started for course {}", version, course.id);
                TriggerOutcome::Spawned {
                    version,
                    superseded: None,
                }
            }
        }
    }

    fn spawn(
        &self,
        key: CacheKey,
        target: GenerationTarget,
        context: PromptContext,
        tier: Tier,
        version: u64,
    ) -> AbortHandle {
        let cache = self.cache.clone();
        let generator = self.generator.clone();
        let in_flight = self.in_flight.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let result = tokio::time::timeout(
                timeout,
                generate_target(generator.as_ref(), &target, &context, tier),
            )
            .await;
            match result {
                Ok(Ok(unit)) => {
                    let content = PregeneratedContent { target, unit };
                    if cache.set_versioned(&key.course_id, &key.user_id, content, version) {
                        info!(
                            "pregeneration {} complete for course {}",
                            version, key.course_id
                        );
                    }
                }
                Ok(Err(e)) => error!(
                    "pregeneration {} failed for course {}: {}",
                    version, key.course_id, e
                ),
                Err(_) => error!(
                    "pregeneration {} for course {} timed out after {:?}",
                    version, key.course_id, timeout
                ),
            }
            in_flight.remove_if(&key, |_, f| f.version == version);
        })
        .abort_handle()
    }

    pub fn is_generating(&self, course_id: &str, user_id: &str) -> bool {
        self.in_flight
            .get(&CacheKey::new(course_id, user_id))
            .is_some_and(|f| !f.abort.is_finished())
    }

    /// Aborts the course's in-flight generation. Returns whether one was running.
    pub fn cancel(&self, course_id: &str, user_id: &str) -> bool {
        match self.in_flight.remove(&CacheKey::new(course_id, user_id)) {
            Some((_, in_flight)) => {
                in_flight.abort.abort();
                debug!(
                    "pregeneration {} for course {} cancelled",
                    in_flight.version, course_id
                );
                true
            }
            None => false,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl<G> Drop for PregenerationService<G> {
    fn drop(&mut self) {
        for entry in self.in_flight.iter() {
            entry.abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        course::{CourseStatus, Lesson, Outline, Section, Step, StepKind},
        generator::ScriptedGenerator,
        progress::ProgressionEngine,
    };

    fn service(generator: &Arc<ScriptedGenerator>) -> PregenerationService<ScriptedGenerator> {
        PregenerationService::new(
            Arc::new(PregenerationCache::default()),
            generator.clone(),
            DEFAULT_GENERATION_TIMEOUT,
        )
    }

    fn outlined_course() -> Course {
        let outline = Outline {
            title: "Rust".into(),
            description: String::new(),
            sections: vec![Section::new(
                "s1",
                "Basics",
                vec![Lesson::new("l1", "Ownership"), Lesson::new("l2", "Borrowing")],
            )],
        };
        let mut course = Course::outlined("c1", "u1", "rust", outline);
        ProgressionEngine::default().start(&mut course);
        course
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_next_target() {
        let mut course = Course::flat("c1", "u1", "rust", 5);
        assert_eq!(
            next_target(&course),
            Some(GenerationTarget::NextStep {
                index: 0,
                lesson_id: None
            })
        );
        if let Curriculum::Steps(curriculum) = &mut course.curriculum {
            curriculum
                .steps
                .push(Step::new(0, StepKind::Lesson, "t".into(), "t".into()));
        }
        assert_eq!(next_target(&course), None);

        let mut course = outlined_course();
        assert_eq!(
            next_target(&course),
            Some(GenerationTarget::LessonBlocks {
                section_id: "s1".into(),
                lesson_id: "l1".into()
            })
        );
        course.outline_status = OutlineStatus::Generating;
        assert_eq!(next_target(&course), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_fills_cache_once() {
        let generator = Arc::new(ScriptedGenerator::new());
        let service = service(&generator);
        let course = Course::flat("c1", "u1", "rust", 5);
        assert!(matches!(
            service.trigger_pregeneration(&course, Tier::Free),
            TriggerOutcome::Spawned {
                superseded: None,
                ..
            }
        ));
        settle().await;
        let cached = service.cache().get("c1", "u1").unwrap();
        assert!(matches!(cached.unit, GeneratedUnit::Step(ref s) if s.index == 0));
        assert_eq!(service.in_flight_count(), 0);
        assert_eq!(
            service.trigger_pregeneration(&course, Tier::Free),
            TriggerOutcome::AlreadyCached
        );
        assert_eq!(generator.step_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_generate_once() {
        let generator = Arc::new(ScriptedGenerator::new().with_delay(Duration::from_secs(5)));
        let service = service(&generator);
        let course = Course::flat("c1", "u1", "rust", 5);
        service.trigger_pregeneration(&course, Tier::Free);
        settle().await;
        assert!(service.is_generating("c1", "u1"));
        assert_eq!(
            service.trigger_pregeneration(&course, Tier::Free),
            TriggerOutcome::AlreadyGenerating
        );
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!service.is_generating("c1", "u1"));
        assert!(service.cache().has("c1", "u1"));
        assert_eq!(generator.step_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_generation_leaves_cache_empty() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.fail_next(1);
        let service = service(&generator);
        let course = Course::flat("c1", "u1", "rust", 5);
        service.trigger_pregeneration(&course, Tier::Free);
        settle().await;
        assert!(!service.cache().has("c1", "u1"));
        assert_eq!(service.in_flight_count(), 0);
        // a later trigger starts over
        assert!(matches!(
            service.trigger_pregeneration(&course, Tier::Free),
            TriggerOutcome::Spawned { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_times_out() {
        let generator = Arc::new(ScriptedGenerator::new().with_delay(Duration::from_secs(120)));
        let service = service(&generator);
        let course = Course::flat("c1", "u1", "rust", 5);
        service.trigger_pregeneration(&course, Tier::Free);
        tokio::time::sleep(DEFAULT_GENERATION_TIMEOUT + Duration::from_secs(1)).await;
        assert!(!service.is_generating("c1", "u1"));
        assert_eq!(service.in_flight_count(), 0);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!service.cache().has("c1", "u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_target_supersedes_in_flight() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push_delay(Duration::from_secs(30));
        generator.push_delay(Duration::from_secs(5));
        let service = service(&generator);
        let mut course = outlined_course();
        let TriggerOutcome::Spawned { version: first, .. } =
            service.trigger_pregeneration(&course, Tier::Free)
        else {
            panic!("first trigger did not spawn");
        };
        settle().await;
        // the learner moves on before the first lesson is generated
        ProgressionEngine::default().skip_current_lesson(&mut course);
        let outcome = service.trigger_pregeneration(&course, Tier::Free);
        let TriggerOutcome::Spawned {
            version: second,
            superseded,
        } = outcome
        else {
            panic!("second trigger did not spawn: {:?}", outcome);
        };
        assert_eq!(superseded, Some(first));
        assert!(second > first);
        assert_eq!(service.in_flight_count(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let cached = service.cache().get("c1", "u1").unwrap();
        assert_eq!(
            cached.target,
            GenerationTarget::LessonBlocks {
                section_id: "s1".into(),
                lesson_id: "l2".into()
            }
        );
        assert_eq!(generator.block_calls(), 2);
        assert_eq!(service.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_and_idle_courses() {
        let generator = Arc::new(ScriptedGenerator::new());
        let service = service(&generator);
        let mut course = Course::flat("c1", "u1", "rust", 5);
        course.status = CourseStatus::Archived;
        assert_eq!(
            service.trigger_pregeneration(&course, Tier::Free),
            TriggerOutcome::Inactive
        );
        let mut course = outlined_course();
        course.outline_status = OutlineStatus::Failed;
        assert_eq!(
            service.trigger_pregeneration(&course, Tier::Free),
            TriggerOutcome::NothingToGenerate
        );
        settle().await;
        assert_eq!(generator.block_calls() + generator.step_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let generator = Arc::new(ScriptedGenerator::new().with_delay(Duration::from_secs(5)));
        let service = service(&generator);
        let course = Course::flat("c1", "u1", "rust", 5);
        service.trigger_pregeneration(&course, Tier::Free);
        assert!(service.cancel("c1", "u1"));
        assert!(!service.cancel("c1", "u1"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!service.cache().has("c1", "u1"));
    }
}
