use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// What the tutor remembers about the learner on one topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicMemory {
    /// 0.0 ..= 1.0
    pub confidence: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_reviewed: Option<OffsetDateTime>,
    #[serde(default)]
    pub times_tested: u32,
}

impl TopicMemory {
    /// Folds a new result into the topic. Only scored results move the confidence.
    pub fn record(&mut self, score: Option<f64>, at: OffsetDateTime) {
        self.times_tested += 1;
        self.last_reviewed = Some(at);
        if let Some(score) = score {
            let s = (score / 100.0).clamp(0.0, 1.0);
            self.confidence = if self.confidence == 0.0 {
                s
            } else {
                (self.confidence + s) / 2.0
            };
        }
    }
}

/// LLM digest of a window of completed units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compaction {
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Index (in completion order) of the last unit folded into the summary
    pub last_step_index: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub compacted_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default)]
    pub topics: BTreeMap<String, TopicMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<Compaction>,
}

impl Memory {
    pub fn record_completion(&mut self, topic: &str, score: Option<f64>, at: OffsetDateTime) {
        if topic.is_empty() {
            return;
        }
        self.topics
            .entry(topic.to_string())
            .or_default()
            .record(score, at);
    }

    pub fn confidence(&self, topic: &str) -> Option<f64> {
        self.topics.get(topic).map(|t| t.confidence)
    }

    /// Number of completed units already folded into the summary
    pub fn compacted_count(&self) -> usize {
        self.compaction
            .as_ref()
            .map_or(0, |c| c.last_step_index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now;

    #[test]
    fn test_confidence_update() {
        let mut memory = Memory::default();
        memory.record_completion("ownership", Some(80.0), now());
        assert!((memory.confidence("ownership").unwrap() - 0.8).abs() < 1e-9);
        memory.record_completion("ownership", Some(60.0), now());
        assert!((memory.confidence("ownership").unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(memory.topics["ownership"].times_tested, 2);
    }

    #[test]
    fn test_unscored_completion_keeps_confidence() {
        let mut memory = Memory::default();
        memory.record_completion("traits", Some(90.0), now());
        let at = now();
        memory.record_completion("traits", None, at);
        let topic = &memory.topics["traits"];
        assert!((topic.confidence - 0.9).abs() < 1e-9);
        assert_eq!(topic.times_tested, 2);
        assert_eq!(topic.last_reviewed, Some(at));
    }
}
