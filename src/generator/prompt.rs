use std::fmt::Write;

use serde::{Deserialize, Serialize};

use super::CompactionRequest;
use crate::{
    compaction::{memory_context, recent_units, step_summary},
    course::Course,
};

/// Topics of this many recent units are shown to the model.
const RECENT_TOPICS: usize = 5;

pub const STEP_SYSTEM_PROMPT: &str = "You are an adaptive tutor. You plan a learner's path one step at a time. \
Each step is a short lesson, a quiz, a practice task or a review. Adapt difficulty to the learner's memory: \
revisit weak topics, move on from strong ones. Answer by calling the provided function.";

pub const BLOCKS_SYSTEM_PROMPT: &str = "You are an adaptive tutor writing one lesson of a course. \
A lesson is a short sequence of blocks: explanations, code examples, questions, tasks, flashcards and a summary. \
Include at least one question block. Answer by calling the provided function.";

pub const OUTLINE_SYSTEM_PROMPT: &str = "You are a curriculum designer. Break the learner's goal into sections of \
small, ordered lessons. Answer by calling the provided function.";

pub const COMPACTION_SYSTEM_PROMPT: &str = "You keep a tutor's long term memory about a learner. \
Merge the previous summary with the newly completed units into an updated digest. Answer by calling the provided function.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonBrief {
    pub section_id: String,
    pub section_title: String,
    pub lesson_id: String,
    pub lesson_title: String,
    pub description: String,
}

/// Everything a generator gets to know about a course
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    pub goal: String,
    /// Index the generated step will take
    pub next_index: usize,
    /// Units completed so far
    pub history_count: usize,
    /// Topics since the last compaction, oldest first
    pub recent_topics: Vec<String>,
    pub memory: String,
    /// The lesson at the learner's cursor, if the course has an outline
    pub lesson: Option<LessonBrief>,
}

impl PromptContext {
    pub fn for_course(course: &Course) -> Self {
        let mut recent_topics: Vec<String> = Vec::new();
        for unit in recent_units(course) {
            if recent_topics.last() != Some(&unit.topic) {
                recent_topics.push(unit.topic);
            }
        }
        let skip = recent_topics.len().saturating_sub(RECENT_TOPICS);
        recent_topics.drain(..skip);

        let lesson = course.curriculum.outline().and_then(|outline| {
            let position = course.position()?;
            let section = outline.sections.get(position.section_index)?;
            let lesson = section.lessons.get(position.lesson_index)?;
            Some(LessonBrief {
                section_id: section.id.clone(),
                section_title: section.title.clone(),
                lesson_id: lesson.id.clone(),
                lesson_title: lesson.title.clone(),
                description: lesson.description.clone(),
            })
        });

        PromptContext {
            goal: course.goal.clone(),
            next_index: course.curriculum.steps().len(),
            history_count: course.curriculum.model().completed_unit_count(),
            recent_topics,
            memory: memory_context(course),
            lesson,
        }
    }

    /// The topic new content should cover
    pub fn topic(&self) -> &str {
        self.lesson
            .as_ref()
            .map_or(self.goal.as_str(), |l| l.lesson_title.as_str())
    }

    fn write_common(&self, out: &mut String) {
        let _ = writeln!(out, "Learning goal: {}", self.goal);
        let _ = writeln!(out, "Units completed so far: {}", self.history_count);
        if !self.recent_topics.is_empty() {
            let _ = writeln!(out, "Recent topics: {}", self.recent_topics.join(", "));
        }
        let _ = writeln!(out, "\nLearner memory:\n{}", self.memory);
        if let Some(lesson) = &self.lesson {
            let _ = writeln!(out, "\nCurrent section: {}", lesson.section_title);
            let _ = writeln!(out, "Current lesson: {}", lesson.lesson_title);
            if !lesson.description.is_empty() {
                let _ = writeln!(out, "Lesson description: {}", lesson.description);
            }
        }
    }

    pub fn step_prompt(&self) -> String {
        let mut out = String::new();
        self.write_common(&mut out);
        let _ = write!(
            out,
            "\nCreate step number {} of this learning path. Do not repeat the recent topics unless the memory shows \
they need more work. Quiz steps need a question, options and the expected answer; practice steps need a task and hints.",
            self.next_index + 1
        );
        out
    }

    pub fn blocks_prompt(&self) -> String {
        let mut out = String::new();
        self.write_common(&mut out);
        let _ = write!(
            out,
            "\nWrite the content blocks of the lesson \"{}\". Keep each block focused, and finish with a summary block.",
            self.topic()
        );
        out
    }
}

pub fn outline_prompt(goal: &str) -> String {
    format!(
        "Learning goal: {goal}\n\nDesign a course outline for this goal: 2 to 6 sections, each with 2 to 6 lessons. \
Give every section and lesson a short title and a one sentence description."
    )
}

pub fn compaction_prompt(request: &CompactionRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Learning goal: {}", request.goal);
    if let Some(previous) = &request.previous_summary {
        let _ = writeln!(out, "\nPrevious summary:\n{}", previous);
    }
    let _ = writeln!(out, "\nNewly completed units:");
    for unit in &request.units {
        let _ = writeln!(out, "{}", step_summary(unit));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        course::{Lesson, Outline, Section, Step, StepKind},
        course::Curriculum,
        progress::{CompletionInput, ProgressionEngine},
    };

    #[test]
    fn test_context_for_outline_course() {
        let outline = Outline {
            title: "Rust".into(),
            description: String::new(),
            sections: vec![Section::new(
                "s1",
                "Basics",
                vec![Lesson::new("l1", "Ownership").with_description("Moves and borrows")],
            )],
        };
        let mut course = Course::outlined("c1", "u1", "learn rust", outline);
        ProgressionEngine::default().start(&mut course);
        let context = PromptContext::for_course(&course);
        assert_eq!(context.topic(), "Ownership");
        assert_eq!(context.memory, "No prior learning history.");
        let prompt = context.blocks_prompt();
        assert!(prompt.contains("Current lesson: Ownership"));
        assert!(prompt.contains("Lesson description: Moves and borrows"));
    }

    #[test]
    fn test_recent_topics_keep_last_five() {
        let engine = ProgressionEngine::default();
        let mut course = Course::flat("c1", "u1", "learn rust", 10);
        for i in 0..7 {
            let Curriculum::Steps(curriculum) = &mut course.curriculum else {
                unreachable!()
            };
            let step = Step::new(i, StepKind::Lesson, format!("topic {i}"), "t".into());
            let id = step.id.clone();
            curriculum.steps.push(step);
            engine.complete_unit(&mut course, &id, &CompletionInput::default());
        }
        let context = PromptContext::for_course(&course);
        assert_eq!(context.next_index, 7);
        assert_eq!(context.history_count, 7);
        assert_eq!(
            context.recent_topics,
            vec!["topic 2", "topic 3", "topic 4", "topic 5", "topic 6"]
        );
        assert!(context.step_prompt().contains("Create step number 8"));
        assert_eq!(context.topic(), "learn rust");
    }
}
