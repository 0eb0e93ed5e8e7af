//! Retrieve-then-read: search once, then answer from the retrieved sources.

use super::client::{ChatCompletions, CompletionRequest};
use super::message_builder::MessageBuilder;
use super::prompts::{ASK_EXAMPLE_ANSWER, ASK_EXAMPLE_QUESTION, ASK_SYSTEM_PROMPT};
use super::retrieval::Retriever;
use super::types::{AskResponse, ChatError, Overrides, Role};
use super::AskApproach;
use crate::tokens::TokenCounter;
use async_trait::async_trait;
use std::sync::Arc;

const ANSWER_TEMPERATURE: f32 = 0.3;
const ANSWER_MAX_TOKENS: u32 = 1024;

/// Single-turn approach registered as `rtr`.
pub struct RetrieveThenRead {
    retriever: Arc<Retriever>,
    chat: Arc<dyn ChatCompletions>,
    counter: TokenCounter,
}

impl RetrieveThenRead {
    /// Build the approach over shared clients.
    pub fn new(retriever: Arc<Retriever>, chat: Arc<dyn ChatCompletions>, counter: TokenCounter) -> Self {
        Self {
            retriever,
            chat,
            counter,
        }
    }
}

#[async_trait]
impl AskApproach for RetrieveThenRead {
    async fn run(&self, question: &str, overrides: &Overrides) -> Result<AskResponse, ChatError> {
        let retrieved = self.retriever.retrieve(question, overrides).await?;
        let content = retrieved.sources.join("\n");

        let system_prompt = overrides
            .prompt_template
            .as_deref()
            .filter(|template| !template.is_empty())
            .unwrap_or(ASK_SYSTEM_PROMPT);
        let mut builder = MessageBuilder::new(system_prompt, self.counter.clone());
        builder.push(Role::User, ASK_EXAMPLE_QUESTION);
        builder.push(Role::Assistant, ASK_EXAMPLE_ANSWER);
        builder.push(Role::User, format!("{question}\nSources:\n {content}"));
        let messages = builder.into_messages();

        let thoughts = format!(
            "Question:<br>{}<br><br>Prompt:<br>{}",
            retrieved.query_text.as_deref().unwrap_or_default(),
            messages
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n\n")
        );
        let answer = self
            .chat
            .complete(&CompletionRequest {
                messages,
                temperature: overrides.temperature_or(ANSWER_TEMPERATURE),
                max_tokens: ANSWER_MAX_TOKENS,
            })
            .await?;

        Ok(AskResponse {
            data_points: retrieved.sources,
            answer,
            thoughts,
        })
    }
}
