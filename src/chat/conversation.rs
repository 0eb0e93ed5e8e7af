//! Chat-read-retrieve-read: rewrite the conversation into a query, search, then answer.

use super::client::{ChatCompletions, ChunkStream, CompletionRequest};
use super::message_builder::messages_from_history;
use super::prompts::{QUERY_PROMPT, QUERY_REQUEST_PREFIX, chat_system_prompt, query_few_shots};
use super::retrieval::Retriever;
use super::types::{ChatContext, ChatError, ChatMessage, ChatResponse, ChatTurn, Overrides};
use super::ChatApproach;
use crate::tokens::{TokenCounter, token_limit};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::json;
use std::sync::Arc;

const QUERY_TEMPERATURE: f32 = 0.0;
const QUERY_MAX_TOKENS: u32 = 100;
const ANSWER_TEMPERATURE: f32 = 0.0;
const ANSWER_MAX_TOKENS: u32 = 1024;
const SOURCE_PREFIX: &str = " SOURCE:";

/// Multi-turn approach registered as `rrr`.
pub struct ChatReadRetrieveRead {
    retriever: Arc<Retriever>,
    chat: Arc<dyn ChatCompletions>,
    counter: TokenCounter,
    token_limit: usize,
}

struct Prepared {
    context: ChatContext,
    request: CompletionRequest,
}

impl ChatReadRetrieveRead {
    /// Build the approach; the token budget follows the chat model's context window.
    pub fn new(retriever: Arc<Retriever>, chat: Arc<dyn ChatCompletions>, counter: TokenCounter) -> Self {
        let token_limit = token_limit(counter.model());
        Self {
            retriever,
            chat,
            counter,
            token_limit,
        }
    }

    /// Override the message token budget.
    pub fn with_token_limit(mut self, token_limit: usize) -> Self {
        self.token_limit = token_limit;
        self
    }

    async fn search_query(&self, history: &[ChatTurn], last_question: &str) -> Result<String, ChatError> {
        let request_text = format!("{QUERY_REQUEST_PREFIX}{last_question}");
        let budget = self
            .token_limit
            .saturating_sub(request_text.chars().count());
        let messages = messages_from_history(
            QUERY_PROMPT,
            self.counter.clone(),
            history,
            &request_text,
            &query_few_shots(),
            budget,
        );
        let generated = self
            .chat
            .complete(&CompletionRequest {
                messages,
                temperature: QUERY_TEMPERATURE,
                max_tokens: QUERY_MAX_TOKENS,
            })
            .await?;
        if generated.trim() == "0" {
            tracing::debug!("No search query generated; using the last question");
            Ok(last_question.to_string())
        } else {
            Ok(generated)
        }
    }

    async fn prepare(&self, history: &[ChatTurn], overrides: &Overrides) -> Result<Prepared, ChatError> {
        let last_question = history
            .last()
            .map(|turn| turn.user.as_str())
            .filter(|question| !question.is_empty())
            .ok_or_else(|| ChatError::InvalidRequest("history needs a user message".to_string()))?;

        let query = self.search_query(history, last_question).await?;
        let retrieved = self.retriever.retrieve(&query, overrides).await?;
        let data_points: Vec<String> = retrieved
            .sources
            .iter()
            .map(|source| format!("{SOURCE_PREFIX}{source}"))
            .collect();
        let content = data_points.join("\n");

        let system_prompt = chat_system_prompt(
            overrides.prompt_template.as_deref(),
            overrides.suggest_followup_questions,
        );
        // Sources go with the newest user message, not the system prompt.
        let messages = messages_from_history(
            &system_prompt,
            self.counter.clone(),
            history,
            &format!("{last_question}\n\n {content}"),
            &[],
            self.token_limit,
        );
        let thoughts = format!(
            "Searched for:<br>{}<br><br>Conversations:<br>{}",
            retrieved.query_text.as_deref().unwrap_or_default(),
            render_messages(&messages).replace('\n', "<br>")
        );
        tracing::debug!(
            messages = messages.len(),
            sources = data_points.len(),
            "Prepared chat completion"
        );

        Ok(Prepared {
            context: ChatContext {
                data_points,
                thoughts,
            },
            request: CompletionRequest {
                messages,
                temperature: overrides.temperature_or(ANSWER_TEMPERATURE),
                max_tokens: ANSWER_MAX_TOKENS,
            },
        })
    }
}

fn render_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl ChatApproach for ChatReadRetrieveRead {
    async fn run(&self, history: &[ChatTurn], overrides: &Overrides) -> Result<ChatResponse, ChatError> {
        let Prepared { context, request } = self.prepare(history, overrides).await?;
        let answer = self.chat.complete(&request).await?;
        Ok(ChatResponse {
            data_points: context.data_points,
            thoughts: context.thoughts,
            answer,
        })
    }

    async fn run_stream(&self, history: &[ChatTurn], overrides: &Overrides) -> Result<ChunkStream, ChatError> {
        let Prepared { context, request } = self.prepare(history, overrides).await?;
        let completion = self.chat.complete_stream(&request).await?;
        let opening = json!({
            "choices": [{
                "delta": { "role": "assistant" },
                "context": context,
                "finish_reason": null,
                "index": 0,
            }],
            "object": "chat.completion.chunk",
        });
        Ok(Box::pin(stream::iter([Ok(opening)]).chain(completion)))
    }
}
