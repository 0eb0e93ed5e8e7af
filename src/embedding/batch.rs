//! Token-limited request batching for embedding models that accept multiple inputs.

use super::{EmbeddingClient, EmbeddingError};
use crate::tokens::TokenCounter;
use std::ops::Range;

/// Per-request limits of a batch-capable embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum summed input tokens per request.
    pub token_limit: usize,
    /// Maximum number of inputs per request.
    pub max_batch_size: usize,
}

/// Limits for models known to accept batched input, `None` otherwise.
pub fn batch_limits_for(model: &str) -> Option<BatchLimits> {
    match model.trim() {
        "text-embedding-ada-002" => Some(BatchLimits {
            token_limit: 8100,
            max_batch_size: 16,
        }),
        _ => None,
    }
}

/// Group consecutive items into request ranges.
///
/// A new range starts when adding the next item would exceed either limit. An item that is
/// over the token limit on its own is sent alone.
pub fn plan_batches(token_counts: &[usize], limits: BatchLimits) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut tokens = 0;
    for (idx, &count) in token_counts.iter().enumerate() {
        let len = idx - start;
        let overflow = tokens + count > limits.token_limit || len >= limits.max_batch_size;
        if len > 0 && overflow {
            batches.push(start..idx);
            start = idx;
            tokens = 0;
        }
        tokens += count;
    }
    if start < token_counts.len() {
        batches.push(start..token_counts.len());
    }
    batches
}

/// Embed `texts` in planned batches, returning one vector per input in input order.
pub async fn embed_in_batches(
    client: &dyn EmbeddingClient,
    texts: &[String],
    counter: &TokenCounter,
    limits: BatchLimits,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let counts: Vec<usize> = texts.iter().map(|text| counter.count(text)).collect();
    let mut embeddings = Vec::with_capacity(texts.len());
    for range in plan_batches(&counts, limits) {
        let batch_tokens: usize = counts[range.clone()].iter().sum();
        let batch = &texts[range.clone()];
        let vectors = client.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, received {}",
                batch.len(),
                vectors.len()
            )));
        }
        tracing::debug!(
            batch_size = batch.len(),
            tokens = batch_tokens,
            "Embedding batch completed"
        );
        embeddings.extend(vectors);
    }
    Ok(embeddings)
}
