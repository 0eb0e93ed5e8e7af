//! Request and response shapes shared by the ask and chat approaches.

use crate::embedding::EmbeddingError;
use crate::search::SearchError;
use crate::tokens::TokenizerError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while answering a question.
#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Chat endpoint responded with an unexpected status code.
    #[error("Unexpected chat completion response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the endpoint.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Response parsed but carried no usable completion.
    #[error("Invalid chat completion response: {0}")]
    InvalidResponse(String),
    /// Request payload was not usable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Query embedding failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Retrieval failed.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// No tokenizer for the chat model.
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}

/// Which retrievers contribute to a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Full-text only.
    Text,
    /// Vector similarity only.
    Vectors,
    /// Text and vectors combined.
    #[default]
    Hybrid,
}

impl RetrievalMode {
    /// Whether the text query is sent.
    pub fn uses_text(self) -> bool {
        matches!(self, Self::Text | Self::Hybrid)
    }

    /// Whether a query embedding is computed.
    pub fn uses_vectors(self) -> bool {
        matches!(self, Self::Vectors | Self::Hybrid)
    }
}

/// Per-request knobs sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Overrides {
    /// Retrievers to use.
    pub retrieval_mode: RetrievalMode,
    /// Rerank with the semantic ranker.
    pub semantic_ranker: bool,
    /// Render sources from extractive captions.
    pub semantic_captions: bool,
    /// Number of sources; zero falls back to 3.
    pub top: Option<usize>,
    /// Category excluded from retrieval.
    pub exclude_category: Option<String>,
    /// Sampling temperature for the answer.
    pub temperature: Option<f32>,
    /// Replacement system prompt, or `>>>`-prefixed text injected into the default one.
    pub prompt_template: Option<String>,
    /// Ask the model for follow-up questions.
    pub suggest_followup_questions: bool,
}

impl Overrides {
    /// Number of sources to retrieve.
    pub fn top(&self) -> usize {
        self.top.filter(|&top| top > 0).unwrap_or(3)
    }

    /// OData filter for the excluded category.
    pub fn filter(&self) -> Option<String> {
        self.exclude_category
            .as_deref()
            .filter(|category| !category.is_empty())
            .map(|category| format!("category ne '{}'", crate::search::escape_odata(category)))
    }

    /// Temperature, with `fallback` for missing or zero values.
    pub fn temperature_or(&self, fallback: f32) -> f32 {
        self.temperature
            .filter(|&temperature| temperature != 0.0)
            .unwrap_or(fallback)
    }
}

/// One exchange of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatTurn {
    /// User message.
    #[serde(default)]
    pub user: String,
    /// Assistant reply; absent on the newest turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<String>,
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions.
    System,
    /// End user.
    User,
    /// Model.
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message sent to the chat completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// Build a message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{'role': '{}', 'content': '{}'}}",
            self.role.as_str(),
            self.content
        )
    }
}

/// Answer produced by an ask approach.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AskResponse {
    /// Rendered sources given to the model.
    pub data_points: Vec<String>,
    /// Model answer.
    pub answer: String,
    /// Trace of the query and prompt, HTML line breaks included.
    pub thoughts: String,
}

/// Retrieval context of a chat answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatContext {
    /// Rendered sources given to the model.
    pub data_points: Vec<String>,
    /// Trace of the generated query and conversation.
    pub thoughts: String,
}

/// Answer produced by a chat approach.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatResponse {
    /// Rendered sources given to the model.
    pub data_points: Vec<String>,
    /// Trace of the generated query and conversation.
    pub thoughts: String,
    /// Model answer.
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_default_missing_fields() {
        let overrides: Overrides = serde_json::from_value(json!({
            "retrieval_mode": "text",
            "top": 0,
            "exclude_category": "o'brien"
        }))
        .expect("overrides");
        assert_eq!(overrides.retrieval_mode, RetrievalMode::Text);
        assert_eq!(overrides.top(), 3);
        assert_eq!(overrides.filter().as_deref(), Some("category ne 'o''brien'"));
        assert_eq!(overrides.temperature_or(0.3), 0.3);
        assert!(!overrides.semantic_ranker);
    }

    #[test]
    fn retrieval_modes_select_retrievers() {
        assert!(RetrievalMode::Hybrid.uses_text() && RetrievalMode::Hybrid.uses_vectors());
        assert!(!RetrievalMode::Vectors.uses_text());
        assert!(!RetrievalMode::Text.uses_vectors());
    }

    #[test]
    fn history_turns_accept_missing_bot() {
        let turns: Vec<ChatTurn> = serde_json::from_value(json!([
            { "user": "최충헌은 누구야?", "bot": "무신입니다." },
            { "user": "언제 죽었어?" }
        ]))
        .expect("turns");
        assert_eq!(turns[1].bot, None);
    }
}
