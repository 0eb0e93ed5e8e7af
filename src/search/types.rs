//! Shared types used by the search index client.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with the search service.
#[derive(Debug, Error)]
pub enum SearchError {
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Search service responded with an unexpected status code.
    #[error("Unexpected search response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// One indexed section, as uploaded to the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    /// Document key: `{file-id}-page-{sequence}`.
    pub id: String,
    /// Section text.
    pub content: String,
    /// Category assigned at ingestion time.
    pub category: Option<String>,
    /// Citation locator of the page the section starts on.
    pub sourcepage: String,
    /// Source file name.
    pub sourcefile: String,
    /// Section embedding, absent when vectors are disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Query sent to the documents search endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Full-text query; `None` matches every document.
    pub text: Option<String>,
    /// OData filter expression.
    pub filter: Option<String>,
    /// Maximum number of hits.
    pub top: usize,
    /// Use the semantic ranker with the `default` configuration.
    pub semantic: bool,
    /// Request extractive captions (semantic ranking only).
    pub captions: bool,
    /// Query vector matched against the `embedding` field.
    pub vector: Option<Vec<f32>>,
    /// Ask the service for the total match count.
    pub include_total_count: bool,
}

/// Results of a search call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Total match count, when requested.
    pub count: Option<u64>,
    /// Matching documents in rank order.
    pub hits: Vec<SearchHit>,
}

/// A single matching document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHit {
    /// Relevance score.
    pub score: f64,
    /// Extractive caption texts, when captions were requested.
    pub captions: Vec<String>,
    /// Retrievable document fields.
    pub fields: Map<String, Value>,
}

impl SearchHit {
    /// String value of `field`, or an empty string when missing.
    pub fn field_str(&self, field: &str) -> &str {
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Outcome of uploading or deleting a set of documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexingSummary {
    /// Documents sent to the service.
    pub attempted: usize,
    /// Documents the service acknowledged as succeeded.
    pub succeeded: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IndexBatchResponse {
    pub value: Vec<IndexingResult>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IndexingResult {
    pub key: String,
    pub status: bool,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(rename = "@odata.count", default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub value: Vec<Map<String, Value>>,
}
