use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionNamedToolChoice, ChatCompletionRequestMessage, ChatCompletionTool,
        ChatCompletionToolChoiceOption, ChatCompletionToolType, CreateChatCompletionRequestArgs,
        FunctionName, FunctionObject,
    },
};
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{
    CompactionRequest, ContentGenerator, MemoryDigest, PromptContext,
    parse::{LessonBlocksDraft, OutlineDraft, StepDraft, parse_json},
    prompt::{
        BLOCKS_SYSTEM_PROMPT, COMPACTION_SYSTEM_PROMPT, OUTLINE_SYSTEM_PROMPT, STEP_SYSTEM_PROMPT,
        compaction_prompt, outline_prompt,
    },
};
use crate::{
    config::LlmConfig,
    course::{Block, Outline, Step, Tier},
    error::GenerationError,
};

pub fn extract_tool<T: JsonSchema>(strict: Option<bool>) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: T::schema_name(),
            description: None,
            parameters: Some(json!(schema_for!(T))),
            strict,
        },
    }
}

/// Generator backed by an OpenAI compatible chat completion API
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    pro_model: Option<String>,
}

impl OpenAiGenerator {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| GenerationError::NotConfigured("AI_MODEL is not set".into()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GenerationError::NotConfigured("OPENAI_API_KEY is not set".into()))?;
        let mut openai = OpenAIConfig::default().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            openai = openai.with_api_base(base_url);
        }
        Ok(Self {
            client: Client::with_config(openai),
            model,
            pro_model: config.pro_model.clone(),
        })
    }

    pub fn model(&self, tier: Tier) -> &str {
        match (tier, &self.pro_model) {
            (Tier::Pro, Some(pro)) => pro,
            _ => &self.model,
        }
    }

    /// Forces the model to answer through a function whose parameters are `T`.
    /// Plain content answers are parsed as JSON as well.
    async fn call<T: JsonSchema + DeserializeOwned + Send>(
        &self,
        system: &str,
        prompt: String,
        tier: Tier,
    ) -> Result<T, GenerationError> {
        let tool = extract_tool::<T>(None);
        let tool_choice = ChatCompletionToolChoiceOption::Named(ChatCompletionNamedToolChoice {
            r#type: ChatCompletionToolType::Function,
            function: FunctionName {
                name: tool.function.name.clone(),
            },
        });
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model(tier))
            .messages(vec![
                ChatCompletionRequestMessage::System(system.into()),
                ChatCompletionRequestMessage::User(prompt.into()),
            ])
            .tools(vec![tool])
            .tool_choice(tool_choice)
            .build()?;
        let response = self.client.chat().create(request).await?;
        if let Some(usage) = &response.usage {
            debug!(
                "{} call used {} prompt and {} completion tokens",
                T::schema_name(),
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }
        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyCompletion)?
            .message;
        if let Some(call) = message.tool_calls.as_ref().and_then(|calls| calls.first()) {
            return parse_json(&call.function.arguments);
        }
        let content = message.content.ok_or(GenerationError::EmptyCompletion)?;
        parse_json(&content)
    }
}

impl ContentGenerator for OpenAiGenerator {
    fn generate_step(
        &self,
        context: &PromptContext,
        tier: Tier,
    ) -> impl Future<Output = Result<Step, GenerationError>> + Send {
        async move {
            let draft: StepDraft = self
                .call(STEP_SYSTEM_PROMPT, context.step_prompt(), tier)
                .await?;
            draft.into_step(context.next_index)
        }
    }

    fn generate_blocks(
        &self,
        context: &PromptContext,
        tier: Tier,
    ) -> impl Future<Output = Result<Vec<Block>, GenerationError>> + Send {
        async move {
            let draft: LessonBlocksDraft = self
                .call(BLOCKS_SYSTEM_PROMPT, context.blocks_prompt(), tier)
                .await?;
            draft.into_blocks()
        }
    }

    fn generate_outline(
        &self,
        goal: &str,
        tier: Tier,
    ) -> impl Future<Output = Result<Outline, GenerationError>> + Send {
        async move {
            let draft: OutlineDraft = self
                .call(OUTLINE_SYSTEM_PROMPT, outline_prompt(goal), tier)
                .await?;
            draft.into_outline()
        }
    }

    fn summarize(
        &self,
        request: &CompactionRequest,
    ) -> impl Future<Output = Result<MemoryDigest, GenerationError>> + Send {
        async move {
            // compaction always runs on the base model
            self.call(COMPACTION_SYSTEM_PROMPT, compaction_prompt(request), Tier::Free)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tool_uses_schema_name() {
        let tool = extract_tool::<StepDraft>(None);
        assert_eq!(tool.function.name, "StepDraft");
        let parameters = tool.function.parameters.unwrap();
        assert!(parameters["properties"]["expectedAnswer"].is_object());
        assert!(parameters["properties"]["type"].is_object());
    }

    #[test]
    fn test_requires_model_and_key() {
        let config = LlmConfig {
            model: Some("gpt-4o-mini".into()),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiGenerator::from_config(&config),
            Err(GenerationError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_pro_tier_model() {
        let config = LlmConfig {
            model: Some("base".into()),
            pro_model: Some("pro".into()),
            api_key: Some("sk-test".into()),
            base_url: Some("http://localhost:1234/v1".into()),
        };
        let generator = OpenAiGenerator::from_config(&config).unwrap();
        assert_eq!(generator.model(Tier::Free), "base");
        assert_eq!(generator.model(Tier::Pro), "pro");
    }
}
