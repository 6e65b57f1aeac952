use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    course::{Compaction, Course},
    error::GenerationError,
    generator::{CompactionRequest, ContentGenerator},
    progress::UnitSummary,
    utils::now,
};

pub const DEFAULT_COMPACTION_INTERVAL: usize = 10;

/// `- kind (topic): title [Score: N%]`
pub fn step_summary(unit: &UnitSummary) -> String {
    let mut line = format!("- {} ({}): {}", unit.kind, unit.topic, unit.title);
    if let Some(score) = unit.score {
        line.push_str(&format!(" [Score: {:.0}%]", score));
    }
    line
}

/// Completed units not yet folded into a digest, in completion order
pub fn recent_units(course: &Course) -> Vec<UnitSummary> {
    let skip = course.memory.compacted_count();
    course
        .curriculum
        .model()
        .completed_units()
        .into_iter()
        .skip(skip)
        .collect()
}

/// The learner memory as shown to the model
pub fn memory_context(course: &Course) -> String {
    let memory = &course.memory;
    let mut parts = Vec::new();
    if let Some(compaction) = &memory.compaction {
        parts.push(format!("Learning Summary: {}", compaction.summary));
        if !compaction.strengths.is_empty() {
            parts.push(format!("Strengths: {}", compaction.strengths.join(", ")));
        }
        if !compaction.weaknesses.is_empty() {
            parts.push(format!(
                "Areas needing work: {}",
                compaction.weaknesses.join(", ")
            ));
        }
        if !compaction.recommendations.is_empty() {
            parts.push(format!(
                "Recommendations: {}",
                compaction.recommendations.join(", ")
            ));
        }
    }
    if !memory.topics.is_empty() {
        let topics: Vec<String> = memory
            .topics
            .iter()
            .map(|(topic, m)| format!("{}: {:.0}%", topic, m.confidence * 100.0))
            .collect();
        parts.push(format!("Topic Confidence: {}", topics.join(", ")));
    }
    if parts.is_empty() {
        return "No prior learning history.".to_string();
    }
    parts.join("\n")
}

/// Folds completed units into an LLM digest every `interval` completions.
pub struct MemoryCompactor<G> {
    generator: Arc<G>,
    interval: usize,
    timeout: Duration,
}

impl<G: ContentGenerator> MemoryCompactor<G> {
    pub fn new(generator: Arc<G>, interval: usize, timeout: Duration) -> Self {
        Self {
            generator,
            interval: interval.max(1),
            timeout,
        }
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn should_compact(&self, course: &Course) -> bool {
        let completed = course.curriculum.model().completed_unit_count();
        completed.saturating_sub(course.memory.compacted_count()) >= self.interval
    }

    /// Compacts when the interval has been reached. Returns whether it did.
    pub async fn maybe_compact(&self, course: &mut Course) -> Result<bool, GenerationError> {
        if !self.should_compact(course) {
            return Ok(false);
        }
        let upto = course.curriculum.model().completed_unit_count() - 1;
        self.compact(course, upto).await?;
        Ok(true)
    }

    /// Digests completed units after the last compaction up to `upto` (inclusive,
    /// in completion order). The course is only touched on success.
    pub async fn compact(&self, course: &mut Course, upto: usize) -> Result<(), GenerationError> {
        let start = course.memory.compacted_count();
        if upto < start {
            return Ok(());
        }
        let units: Vec<UnitSummary> = course
            .curriculum
            .model()
            .completed_units()
            .into_iter()
            .skip(start)
            .take(upto + 1 - start)
            .collect();
        if units.is_empty() {
            return Ok(());
        }
        let upto = start + units.len() - 1;
        let request = CompactionRequest {
            goal: course.goal.clone(),
            previous_summary: course.memory.compaction.as_ref().map(|c| c.summary.clone()),
            units,
            upto,
        };
        let digest = tokio::time::timeout(self.timeout, self.generator.summarize(&request))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;
        course.memory.compaction = Some(Compaction {
            summary: digest.summary,
            strengths: digest.strengths,
            weaknesses: digest.weaknesses,
            recommendations: digest.recommendations,
            last_step_index: upto,
            compacted_at: now(),
        });
        info!(
            "compacted memory of course {} over units {}..={}",
            course.id, start, upto
        );
        Ok(())
    }
}
