//! Embedding client abstraction and the Azure OpenAI adapter.

use crate::config::OpenAiConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod batch;
pub mod retry;

pub use batch::{BatchLimits, batch_limits_for, embed_in_batches, plan_batches};
pub use retry::{RetryPolicy, Retryable};

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider throttled the request.
    #[error("Rate limited by the embeddings endpoint")]
    RateLimited {
        /// Server-suggested wait, when provided.
        retry_after: Option<Duration>,
    },
    /// Provider responded with an unexpected status code.
    #[error("Unexpected embeddings response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Response parsed but did not match the request.
    #[error("Invalid embeddings response: {0}")]
    InvalidResponse(String),
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => !err.is_decode() && !err.is_builder(),
            Self::RateLimited { .. } => true,
            Self::UnexpectedStatus { status, .. } => status.is_server_error(),
            Self::InvalidResponse(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one embedding per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))
    }
}

/// Embeddings served by an Azure OpenAI deployment.
pub struct AzureOpenAiEmbeddings {
    client: Client,
    url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl AzureOpenAiEmbeddings {
    /// Build a client for the configured embedding deployment.
    pub fn new(config: &OpenAiConfig, retry: RetryPolicy) -> Result<Self, EmbeddingError> {
        let client = Client::builder().user_agent("docrag/0.2").build()?;
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.embedding_deployment,
            config.api_version
        );
        tracing::debug!(
            url = %url,
            model = %config.embedding_model,
            has_api_key = config.api_key.is_some(),
            "Initialized embeddings client"
        );
        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            retry,
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&EmbeddingRequest { input: texts });
        if let Some(api_key) = &self.api_key {
            request = request.header("api-key", api_key);
        }
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(EmbeddingError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = EmbeddingError::UnexpectedStatus { status, body };
            tracing::warn!(error = %error, "Embeddings request failed");
            return Err(error);
        }

        let EmbeddingResponse { mut data } = response.json().await?;
        if data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                data.len()
            )));
        }
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for AzureOpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry.run(|| self.request_embeddings(texts)).await
    }
}
