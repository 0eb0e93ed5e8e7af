//! Source retrieval shared by the ask and chat approaches.

use super::types::{ChatError, Overrides};
use crate::config::KbFields;
use crate::embedding::EmbeddingClient;
use crate::search::{SearchBackend, SearchHit, SearchQuery};
use std::sync::Arc;

/// Sources found for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieved {
    /// Text query actually sent, `None` in vector-only mode.
    pub query_text: Option<String>,
    /// One rendered line per hit: `"{sourcepage}: {text}"`.
    pub sources: Vec<String>,
}

/// Runs text, vector, or hybrid queries and renders the hits as citable sources.
pub struct Retriever {
    search: Arc<dyn SearchBackend>,
    embeddings: Arc<dyn EmbeddingClient>,
    fields: KbFields,
}

impl Retriever {
    /// Build a retriever over the given backends.
    pub fn new(
        search: Arc<dyn SearchBackend>,
        embeddings: Arc<dyn EmbeddingClient>,
        fields: KbFields,
    ) -> Self {
        Self {
            search,
            embeddings,
            fields,
        }
    }

    /// Retrieve sources for `query` under the request overrides.
    pub async fn retrieve(&self, query: &str, overrides: &Overrides) -> Result<Retrieved, ChatError> {
        let mode = overrides.retrieval_mode;
        let vector = if mode.uses_vectors() {
            Some(self.embeddings.embed_one(query).await?)
        } else {
            None
        };
        let query_text = mode.uses_text().then(|| query.to_string());
        let semantic = overrides.semantic_ranker && mode.uses_text();
        let captions = semantic && overrides.semantic_captions;

        let search_query = SearchQuery {
            text: query_text.clone(),
            filter: overrides.filter(),
            top: overrides.top(),
            semantic,
            captions,
            vector,
            include_total_count: false,
        };
        let results = self.search.search(&search_query).await?;
        tracing::debug!(
            mode = ?mode,
            semantic,
            hits = results.hits.len(),
            "Retrieved sources"
        );

        let sources = results
            .hits
            .iter()
            .map(|hit| self.render(hit, captions))
            .collect();
        Ok(Retrieved {
            query_text,
            sources,
        })
    }

    fn render(&self, hit: &SearchHit, captions: bool) -> String {
        let text = if captions {
            hit.captions.join(" . ")
        } else {
            hit.field_str(&self.fields.content).to_string()
        };
        format!(
            "{}: {}",
            hit.field_str(&self.fields.sourcepage),
            no_newlines(&text)
        )
    }
}

/// Replace line breaks with spaces.
pub fn no_newlines(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}
