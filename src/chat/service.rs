//! Approach registry backing the HTTP surface.

use super::client::ChunkStream;
use super::types::{AskResponse, ChatError, ChatResponse, ChatTurn, Overrides};
use super::{AskApproach, ChatApproach};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::storage::{BlobContent, BlobError, BlobStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the question-answering service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No approach is registered under the requested key.
    #[error("unknown approach: {0}")]
    UnknownApproach(String),
    /// Approach failed.
    #[error(transparent)]
    Chat(#[from] ChatError),
    /// Content lookup failed.
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// Operations exposed over HTTP.
#[async_trait]
pub trait RagApi: Send + Sync {
    /// Answer a single question.
    async fn ask(
        &self,
        approach: &str,
        question: &str,
        overrides: &Overrides,
    ) -> Result<AskResponse, ServiceError>;

    /// Answer the newest turn of a conversation.
    async fn chat(
        &self,
        approach: &str,
        history: &[ChatTurn],
        overrides: &Overrides,
    ) -> Result<ChatResponse, ServiceError>;

    /// Stream the answer to the newest turn.
    async fn chat_stream(
        &self,
        approach: &str,
        history: &[ChatTurn],
        overrides: &Overrides,
    ) -> Result<ChunkStream, ServiceError>;

    /// Fetch a stored source document.
    async fn content(&self, path: &str) -> Result<BlobContent, ServiceError>;

    /// Current counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Service holding the registered approaches and the content store.
pub struct RagService {
    ask_approaches: HashMap<String, Arc<dyn AskApproach>>,
    chat_approaches: HashMap<String, Arc<dyn ChatApproach>>,
    blobs: BlobStore,
    metrics: Arc<IngestMetrics>,
}

impl RagService {
    /// Create a service with no approaches registered.
    pub fn new(blobs: BlobStore) -> Self {
        Self {
            ask_approaches: HashMap::new(),
            chat_approaches: HashMap::new(),
            blobs,
            metrics: Arc::new(IngestMetrics::new()),
        }
    }

    /// Register an ask approach under `key`.
    pub fn with_ask(mut self, key: &str, approach: Arc<dyn AskApproach>) -> Self {
        self.ask_approaches.insert(key.to_string(), approach);
        self
    }

    /// Register a chat approach under `key`.
    pub fn with_chat(mut self, key: &str, approach: Arc<dyn ChatApproach>) -> Self {
        self.chat_approaches.insert(key.to_string(), approach);
        self
    }

    fn ask_approach(&self, key: &str) -> Result<&Arc<dyn AskApproach>, ServiceError> {
        self.ask_approaches
            .get(key)
            .ok_or_else(|| ServiceError::UnknownApproach(key.to_string()))
    }

    fn chat_approach(&self, key: &str) -> Result<&Arc<dyn ChatApproach>, ServiceError> {
        self.chat_approaches
            .get(key)
            .ok_or_else(|| ServiceError::UnknownApproach(key.to_string()))
    }
}

#[async_trait]
impl RagApi for RagService {
    async fn ask(
        &self,
        approach: &str,
        question: &str,
        overrides: &Overrides,
    ) -> Result<AskResponse, ServiceError> {
        let response = self.ask_approach(approach)?.run(question, overrides).await?;
        self.metrics.record_answer();
        Ok(response)
    }

    async fn chat(
        &self,
        approach: &str,
        history: &[ChatTurn],
        overrides: &Overrides,
    ) -> Result<ChatResponse, ServiceError> {
        let response = self.chat_approach(approach)?.run(history, overrides).await?;
        self.metrics.record_answer();
        Ok(response)
    }

    async fn chat_stream(
        &self,
        approach: &str,
        history: &[ChatTurn],
        overrides: &Overrides,
    ) -> Result<ChunkStream, ServiceError> {
        let stream = self
            .chat_approach(approach)?
            .run_stream(history, overrides)
            .await?;
        self.metrics.record_answer();
        Ok(stream)
    }

    async fn content(&self, path: &str) -> Result<BlobContent, ServiceError> {
        tracing::info!(path, "Serving content file");
        Ok(self.blobs.download(path).await?)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
