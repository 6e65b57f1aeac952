use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;

use super::{CompactionRequest, ContentGenerator, MemoryDigest, PromptContext};
use crate::{
    course::{Block, BlockBody, Lesson, Outline, Section, Step, StepKind, Tier},
    error::GenerationError,
};

/// Deterministic generator that needs no network.
///
/// Used for offline runs of the CLI and as the generator in tests, where delays
/// and failures can be scripted per call.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    delay: Mutex<Duration>,
    delays: Mutex<VecDeque<Duration>>,
    failures: AtomicUsize,
    summary_failures: AtomicUsize,
    step_calls: AtomicUsize,
    block_calls: AtomicUsize,
    outline_calls: AtomicUsize,
    summary_calls: AtomicUsize,
    contexts: Mutex<Vec<PromptContext>>,
    compactions: Mutex<Vec<CompactionRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long unless a queued delay applies.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    /// Delay for the next call only, queued after earlier ones
    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().push_back(delay);
    }

    /// The next `n` content calls fail with an API error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_summaries(&self, n: usize) {
        self.summary_failures.store(n, Ordering::SeqCst);
    }

    pub fn step_calls(&self) -> usize {
        self.step_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn outline_calls(&self) -> usize {
        self.outline_calls.load(Ordering::SeqCst)
    }

    pub fn summary_calls(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<PromptContext> {
        self.contexts.lock().clone()
    }

    pub fn compactions(&self) -> Vec<CompactionRequest> {
        self.compactions.lock().clone()
    }

    fn next_delay(&self) -> Duration {
        self.delays.lock().pop_front().unwrap_or(*self.delay.lock())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn pause(&self) -> Result<(), GenerationError> {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.failures) {
            return Err(GenerationError::Api("scripted failure".into()));
        }
        Ok(())
    }
}

fn scripted_step(context: &PromptContext) -> Step {
    let index = context.next_index;
    let topic = context.topic().to_string();
    // every third step checks what came before
    if index % 3 == 2 {
        let mut step = Step::new(index, StepKind::Quiz, topic.clone(), format!("Check: {topic}"))
            .with_content(format!("A short check on {topic}."));
        step.question = Some(format!("Which statement about {topic} is true?"));
        step.options = vec![
            format!("{topic} was covered in the previous steps"),
            format!("{topic} has not been mentioned yet"),
        ];
        step.expected_answer = step.options.first().cloned();
        step
    } else {
        Step::new(index, StepKind::Lesson, topic.clone(), format!("Step {}: {topic}", index + 1))
            .with_content(format!("An introduction to {topic}, part {}.", index + 1))
    }
}

fn scripted_blocks(context: &PromptContext) -> Vec<Block> {
    let topic = context.topic();
    vec![
        Block::new(
            0,
            format!("About {topic}"),
            BlockBody::Text {
                markdown: format!("## {topic}\n\nWhat {topic} is and why it matters."),
            },
        ),
        Block::new(
            1,
            "Quick check".into(),
            BlockBody::Question {
                text: format!("Did you follow the explanation of {topic}?"),
                options: vec!["yes".into(), "no".into()],
                correct_answer: "yes".into(),
                explanation: None,
            },
        ),
        Block::new(
            2,
            "Summary".into(),
            BlockBody::Summary {
                key_points: vec![format!("{topic} in one sentence")],
            },
        ),
    ]
}

fn scripted_outline(goal: &str) -> Outline {
    let section = |n: usize, title: &str| {
        Section::new(
            format!("section-{n}"),
            format!("{title} of {goal}"),
            (1..=2)
                .map(|l| Lesson::new(format!("lesson-{n}-{l}"), format!("{title} {l}")))
                .collect(),
        )
    };
    Outline {
        title: goal.to_string(),
        description: format!("A short course on {goal}"),
        sections: vec![section(1, "Foundations"), section(2, "Practice")],
    }
}

impl ContentGenerator for ScriptedGenerator {
    fn generate_step(
        &self,
        context: &PromptContext,
        _tier: Tier,
    ) -> impl Future<Output = Result<Step, GenerationError>> + Send {
        async move {
            self.step_calls.fetch_add(1, Ordering::SeqCst);
            self.contexts.lock().push(context.clone());
            self.pause().await?;
            Ok(scripted_step(context))
        }
    }

    fn generate_blocks(
        &self,
        context: &PromptContext,
        _tier: Tier,
    ) -> impl Future<Output = Result<Vec<Block>, GenerationError>> + Send {
        async move {
            self.block_calls.fetch_add(1, Ordering::SeqCst);
            self.contexts.lock().push(context.clone());
            self.pause().await?;
            Ok(scripted_blocks(context))
        }
    }

    fn generate_outline(
        &self,
        goal: &str,
        _tier: Tier,
    ) -> impl Future<Output = Result<Outline, GenerationError>> + Send {
        async move {
            self.outline_calls.fetch_add(1, Ordering::SeqCst);
            self.pause().await?;
            Ok(scripted_outline(goal))
        }
    }

    fn summarize(
        &self,
        request: &CompactionRequest,
    ) -> impl Future<Output = Result<MemoryDigest, GenerationError>> + Send {
        async move {
            self.summary_calls.fetch_add(1, Ordering::SeqCst);
            self.compactions.lock().push(request.clone());
            if Self::take_failure(&self.summary_failures) {
                return Err(GenerationError::Api("scripted summary failure".into()));
            }
            let mut topics: Vec<&str> = request.units.iter().map(|u| u.topic.as_str()).collect();
            topics.dedup();
            let strengths = request
                .units
                .iter()
                .filter(|u| u.score.is_some_and(|s| s >= 80.0))
                .map(|u| u.topic.clone())
                .collect();
            let weaknesses: Vec<String> = request
                .units
                .iter()
                .filter(|u| u.score.is_some_and(|s| s < 70.0))
                .map(|u| u.topic.clone())
                .collect();
            let recommendations = weaknesses.iter().map(|t| format!("Review {t}")).collect();
            Ok(MemoryDigest {
                summary: format!(
                    "Completed {} units on {}.",
                    request.units.len(),
                    topics.join(", ")
                ),
                strengths,
                weaknesses,
                recommendations,
            })
        }
    }
}
