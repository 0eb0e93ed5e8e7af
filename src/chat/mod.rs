//! Question answering over the indexed sections.
//!
//! Two approaches are provided:
//!
//! - [`RetrieveThenRead`] (`rtr`) searches with the question as asked and answers from the hits.
//! - [`ChatReadRetrieveRead`] (`rrr`) first asks the model to rewrite the conversation into a
//!   search query, then answers the newest turn with the retrieved sources and as much history
//!   as fits the model's context window. It also supports streaming.
//!
//! Both render sources as `"{sourcepage}: {text}"` lines so answers can cite them in brackets.

mod ask;
pub mod client;
mod conversation;
pub mod message_builder;
pub mod prompts;
pub mod retrieval;
mod service;
pub mod types;

pub use ask::RetrieveThenRead;
pub use client::{AzureChatClient, ChatCompletions, ChunkStream, CompletionRequest};
pub use conversation::ChatReadRetrieveRead;
pub use message_builder::MessageBuilder;
pub use retrieval::Retriever;
pub use service::{RagApi, RagService, ServiceError};
pub use types::{
    AskResponse, ChatContext, ChatError, ChatMessage, ChatResponse, ChatTurn, Overrides,
    RetrievalMode, Role,
};

use async_trait::async_trait;

/// A single-turn question answering strategy.
#[async_trait]
pub trait AskApproach: Send + Sync {
    /// Answer `question`.
    async fn run(&self, question: &str, overrides: &Overrides) -> Result<AskResponse, ChatError>;
}

/// A conversational question answering strategy.
#[async_trait]
pub trait ChatApproach: Send + Sync {
    /// Answer the newest turn of `history`.
    async fn run(&self, history: &[ChatTurn], overrides: &Overrides) -> Result<ChatResponse, ChatError>;

    /// Stream the answer: a context chunk first, then completion deltas.
    async fn run_stream(
        &self,
        history: &[ChatTurn],
        overrides: &Overrides,
    ) -> Result<ChunkStream, ChatError>;
}
