//! Token counting and model context limits.
//!
//! Token counts drive two budgets: embedding batches (per-request token limit) and chat message
//! assembly (model context window). Both use `tiktoken-rs` encodings resolved from the model
//! name, falling back to `cl100k_base` for deployment aliases the tokenizer does not know.

use std::fmt;
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size};
use thiserror::Error;

/// Raised when no encoding could be built for a model.
#[derive(Debug, Error)]
#[error("Tokenizer unavailable for model {model}: {source}")]
pub struct TokenizerError {
    /// Model name that was resolved.
    pub model: String,
    /// Underlying tokenizer failure.
    #[source]
    pub source: anyhow::Error,
}

/// Cheaply clonable token counter for a single model.
#[derive(Clone)]
pub struct TokenCounter {
    model: String,
    encoding: Arc<CoreBPE>,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl TokenCounter {
    /// Build a counter for `model`, accepting Azure-style names such as `gpt-35-turbo`.
    pub fn for_model(model: &str) -> Result<Self, TokenizerError> {
        let target = openai_model_name(model);
        let encoding = match get_bpe_from_model(&target) {
            Ok(encoding) => encoding,
            Err(model_err) => {
                tracing::debug!(
                    model = %target,
                    error = %model_err,
                    "Tokenizer model lookup failed; using cl100k_base"
                );
                cl100k_base().map_err(|source| TokenizerError {
                    model: target.clone(),
                    source,
                })?
            }
        };
        Ok(Self {
            model: target,
            encoding: Arc::new(encoding),
        })
    }

    /// Model name after normalization.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Number of tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.encoding.encode_with_special_tokens(text).len()
    }
}

/// Context window of a chat model, in tokens.
pub fn token_limit(model: &str) -> usize {
    get_context_size(&openai_model_name(model))
}

/// Azure deployments spell `gpt-3.5` as `gpt-35`.
fn openai_model_name(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.is_empty() {
        return "gpt-3.5-turbo".to_string();
    }
    trimmed.replace("gpt-35", "gpt-3.5")
}
