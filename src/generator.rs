pub mod openai;
pub mod parse;
pub mod prompt;
pub mod scripted;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiGenerator;
pub use prompt::PromptContext;
pub use scripted::ScriptedGenerator;

use crate::{
    course::{Block, Outline, Step, Tier},
    error::GenerationError,
    progress::UnitSummary,
};

/// Input of a memory compaction: the units completed since the last digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionRequest {
    pub goal: String,
    pub previous_summary: Option<String>,
    pub units: Vec<UnitSummary>,
    /// Completion index of the last unit in `units`
    pub upto: usize,
}

/// Digest of the learner's recent work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryDigest {
    /// A short paragraph on what the learner has covered and how it went
    pub summary: String,
    /// Topics or skills the learner handles well
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Topics or skills that need more practice
    #[serde(default)]
    pub weaknesses: Vec<String>,
    /// What the next units should focus on
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Source of generated learning content.
///
/// Implementations must be cheap to share: services hold them in an `Arc` and call
/// them from spawned tasks.
pub trait ContentGenerator: Send + Sync + 'static {
    /// The next step of a flat course, indexed `context.next_index`
    fn generate_step(
        &self,
        context: &PromptContext,
        tier: Tier,
    ) -> impl Future<Output = Result<Step, GenerationError>> + Send;

    /// The content blocks of the lesson described by `context`
    fn generate_blocks(
        &self,
        context: &PromptContext,
        tier: Tier,
    ) -> impl Future<Output = Result<Vec<Block>, GenerationError>> + Send;

    fn generate_outline(
        &self,
        goal: &str,
        tier: Tier,
    ) -> impl Future<Output = Result<Outline, GenerationError>> + Send;

    fn summarize(
        &self,
        request: &CompactionRequest,
    ) -> impl Future<Output = Result<MemoryDigest, GenerationError>> + Send;
}
