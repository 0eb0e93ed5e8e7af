//! HTTP client wrapper for the search index REST API.

use crate::config::SearchConfig;
use crate::search::{
    schema::{EMBEDDING_DIMENSIONS, SEMANTIC_CONFIGURATION, index_definition},
    types::{
        IndexBatchResponse, IndexingSummary, SearchDocument, SearchError, SearchHit, SearchQuery,
        SearchResponse, SearchResults,
    },
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};
use std::time::Duration;

/// REST API version sent with every request.
pub const API_VERSION: &str = "2023-11-01";
/// Documents sent per indexing request.
pub const UPLOAD_BATCH_SIZE: usize = 1000;

/// Read access to the section index, as used by the ask/chat approaches.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run a query against the index.
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, SearchError>;
}

/// Lightweight HTTP client for one search index.
pub struct SearchIndexClient {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) index: String,
    pub(crate) api_key: Option<String>,
}

impl SearchIndexClient {
    /// Construct a client for the configured index.
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let client = Client::builder().user_agent("docrag/0.2").build()?;
        tracing::debug!(
            url = %config.endpoint,
            index = %config.index,
            has_api_key = config.api_key.as_deref().is_some_and(|key| !key.is_empty()),
            "Initialized search HTTP client"
        );
        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Name of the index this client targets.
    pub fn index_name(&self) -> &str {
        &self.index
    }

    /// Create the index only when it does not exist yet.
    pub async fn create_index_if_missing(&self, analyzer: &str) -> Result<(), SearchError> {
        if self.index_exists().await? {
            tracing::info!(index = %self.index, "Search index already exists");
            return Ok(());
        }

        tracing::info!(index = %self.index, analyzer, "Creating search index");
        let body = index_definition(&self.index, analyzer, EMBEDDING_DIMENSIONS);
        let response = self
            .request(Method::PUT, &format!("indexes/{}", self.index))
            .json(&body)
            .send()
            .await?;
        self.ensure_success(response).await
    }

    /// Upload documents in batches of [`UPLOAD_BATCH_SIZE`].
    pub async fn upload_documents(
        &self,
        documents: &[SearchDocument],
    ) -> Result<IndexingSummary, SearchError> {
        let mut summary = IndexingSummary::default();
        for batch in documents.chunks(UPLOAD_BATCH_SIZE) {
            let actions: Vec<Value> = batch
                .iter()
                .map(|document| with_action("upload", json!(document)))
                .collect();
            let batch_summary = self.index_batch(actions).await?;
            tracing::info!(
                index = %self.index,
                indexed = batch_summary.attempted,
                succeeded = batch_summary.succeeded,
                "Indexed sections"
            );
            summary.attempted += batch_summary.attempted;
            summary.succeeded += batch_summary.succeeded;
        }
        Ok(summary)
    }

    /// Delete documents by key.
    pub async fn delete_documents(&self, ids: &[String]) -> Result<IndexingSummary, SearchError> {
        let mut summary = IndexingSummary::default();
        for batch in ids.chunks(UPLOAD_BATCH_SIZE) {
            let actions: Vec<Value> = batch
                .iter()
                .map(|id| with_action("delete", json!({ "id": id })))
                .collect();
            let batch_summary = self.index_batch(actions).await?;
            summary.attempted += batch_summary.attempted;
            summary.succeeded += batch_summary.succeeded;
        }
        Ok(summary)
    }

    /// Remove every section of `sourcefile` (or of all files when `None`).
    ///
    /// Searches and deletes until the service reports no matches, pausing between rounds so the
    /// index can catch up with the deletions.
    pub async fn remove_sections(
        &self,
        sourcefile: Option<&str>,
        pause: Duration,
    ) -> Result<usize, SearchError> {
        let filter = sourcefile.map(|name| format!("sourcefile eq '{}'", escape_odata(name)));
        let query = SearchQuery {
            filter,
            top: UPLOAD_BATCH_SIZE,
            include_total_count: true,
            ..SearchQuery::default()
        };

        let mut removed = 0;
        loop {
            let results = self.run_query(&query).await?;
            let ids: Vec<String> = results
                .hits
                .iter()
                .map(|hit| hit.field_str("id").to_string())
                .filter(|id| !id.is_empty())
                .collect();
            if results.count == Some(0) || ids.is_empty() {
                break;
            }
            let summary = self.delete_documents(&ids).await?;
            removed += summary.succeeded;
            tracing::info!(
                index = %self.index,
                sourcefile = sourcefile.unwrap_or("<all>"),
                removed = summary.succeeded,
                "Removed sections from index"
            );
            tokio::time::sleep(pause).await;
        }
        Ok(removed)
    }

    async fn run_query(&self, query: &SearchQuery) -> Result<SearchResults, SearchError> {
        let response = self
            .request(Method::POST, &format!("indexes/{}/docs/search", self.index))
            .json(&search_body(query))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = SearchError::UnexpectedStatus { status, body };
            tracing::error!(index = %self.index, error = %error, "Search request failed");
            return Err(error);
        }

        let payload: SearchResponse = response.json().await?;
        Ok(SearchResults {
            count: payload.count,
            hits: payload.value.into_iter().map(into_hit).collect(),
        })
    }

    async fn index_batch(&self, actions: Vec<Value>) -> Result<IndexingSummary, SearchError> {
        let attempted = actions.len();
        let response = self
            .request(Method::POST, &format!("indexes/{}/docs/index", self.index))
            .json(&json!({ "value": actions }))
            .send()
            .await?;

        // 207 means some documents failed; per-document status tells which.
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = SearchError::UnexpectedStatus { status, body };
            tracing::error!(index = %self.index, error = %error, "Indexing request failed");
            return Err(error);
        }

        let IndexBatchResponse { value } = response.json().await?;
        for failed in value.iter().filter(|result| !result.status) {
            tracing::warn!(
                key = %failed.key,
                error = failed.error_message.as_deref().unwrap_or_default(),
                "Document was not indexed"
            );
        }
        Ok(IndexingSummary {
            attempted,
            succeeded: value.iter().filter(|result| result.status).count(),
        })
    }

    async fn index_exists(&self) -> Result<bool, SearchError> {
        let response = self
            .request(Method::GET, &format!("indexes/{}", self.index))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = SearchError::UnexpectedStatus { status, body };
                tracing::error!(index = %self.index, error = %error, "Index existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut req = self
            .client
            .request(method, url)
            .query(&[("api-version", API_VERSION)]);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success(&self, response: reqwest::Response) -> Result<(), SearchError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = SearchError::UnexpectedStatus { status, body };
            tracing::error!(index = %self.index, error = %error, "Search request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl SearchBackend for SearchIndexClient {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, SearchError> {
        self.run_query(query).await
    }
}

/// Double single quotes for use inside an OData string literal.
pub fn escape_odata(value: &str) -> String {
    value.replace('\'', "''")
}

fn with_action(action: &str, document: Value) -> Value {
    let mut fields = match document {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    fields.insert("@search.action".into(), Value::String(action.into()));
    Value::Object(fields)
}

fn search_body(query: &SearchQuery) -> Value {
    let mut body = Map::new();
    if let Some(text) = query.text.as_deref().filter(|text| !text.is_empty()) {
        body.insert("search".into(), Value::String(text.to_string()));
    }
    if let Some(filter) = &query.filter {
        body.insert("filter".into(), Value::String(filter.clone()));
    }
    body.insert("top".into(), Value::from(query.top));
    if query.include_total_count {
        body.insert("count".into(), Value::Bool(true));
    }
    if query.semantic {
        body.insert("queryType".into(), Value::String("semantic".into()));
        body.insert(
            "semanticConfiguration".into(),
            Value::String(SEMANTIC_CONFIGURATION.into()),
        );
        if query.captions {
            body.insert(
                "captions".into(),
                Value::String("extractive|highlight-false".into()),
            );
        }
    }
    if let Some(vector) = &query.vector {
        body.insert(
            "vectorQueries".into(),
            json!([{
                "kind": "vector",
                "vector": vector,
                "k": query.top,
                "fields": "embedding"
            }]),
        );
    }
    Value::Object(body)
}

fn into_hit(mut fields: Map<String, Value>) -> SearchHit {
    let score = fields
        .remove("@search.score")
        .and_then(|value| value.as_f64())
        .unwrap_or_default();
    let captions = fields
        .remove("@search.captions")
        .and_then(|value| match value {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .unwrap_or_default()
        .into_iter()
        .filter_map(|caption| caption.get("text").and_then(Value::as_str).map(str::to_string))
        .collect();
    fields.retain(|key, _| !key.starts_with("@search."));
    SearchHit {
        score,
        captions,
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };

    fn client_for(server: &MockServer) -> SearchIndexClient {
        SearchIndexClient {
            client: Client::builder()
                .user_agent("docrag-test")
                .build()
                .expect("client"),
            base_url: server.base_url(),
            index: "gptkbindex".into(),
            api_key: Some("search-key".into()),
        }
    }

    fn document(id: &str) -> SearchDocument {
        SearchDocument {
            id: id.into(),
            content: "text".into(),
            category: Some("history".into()),
            sourcepage: "doc-0.pdf".into(),
            sourcefile: "doc.pdf".into(),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn missing_index_is_created_with_analyzer() {
        let server = MockServer::start_async().await;
        let exists = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/indexes/gptkbindex")
                    .query_param("api-version", API_VERSION)
                    .header("api-key", "search-key");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/indexes/gptkbindex")
                    .body_contains("\"analyzer\":\"ko.lucene\"");
                then.status(201).json_body(json!({ "name": "gptkbindex" }));
            })
            .await;

        client_for(&server)
            .create_index_if_missing("ko.lucene")
            .await
            .expect("index created");

        exists.assert();
        create.assert();
    }

    #[tokio::test]
    async fn existing_index_is_left_alone() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/indexes/gptkbindex");
                then.status(200).json_body(json!({ "name": "gptkbindex" }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/indexes/gptkbindex");
                then.status(201);
            })
            .await;

        client_for(&server)
            .create_index_if_missing("ja.lucene")
            .await
            .expect("existing index");
        create.assert_hits(0);
    }

    #[tokio::test]
    async fn uploads_report_succeeded_documents() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/gptkbindex/docs/index")
                    .body_contains("\"@search.action\":\"upload\"");
                then.status(207).json_body(json!({
                    "value": [
                        { "key": "a", "status": true, "statusCode": 201 },
                        { "key": "b", "status": false, "statusCode": 400, "errorMessage": "bad" }
                    ]
                }));
            })
            .await;

        let summary = client_for(&server)
            .upload_documents(&[document("a"), document("b")])
            .await
            .expect("upload");

        mock.assert();
        assert_eq!(
            summary,
            IndexingSummary {
                attempted: 2,
                succeeded: 1
            }
        );
    }

    #[tokio::test]
    async fn search_parses_hits_and_captions() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/gptkbindex/docs/search")
                    .json_body(json!({
                        "search": "무신 정권",
                        "filter": "category ne 'x'",
                        "top": 3,
                        "queryType": "semantic",
                        "semanticConfiguration": "default",
                        "captions": "extractive|highlight-false"
                    }));
                then.status(200).json_body(json!({
                    "value": [
                        {
                            "@search.score": 1.5,
                            "@search.captions": [ { "text": "caption one" } ],
                            "id": "file-1",
                            "sourcepage": "doc-2.pdf",
                            "content": "body"
                        }
                    ]
                }));
            })
            .await;

        let results = client_for(&server)
            .search(&SearchQuery {
                text: Some("무신 정권".into()),
                filter: Some("category ne 'x'".into()),
                top: 3,
                semantic: true,
                captions: true,
                ..SearchQuery::default()
            })
            .await
            .expect("search");

        mock.assert();
        assert_eq!(results.hits.len(), 1);
        let hit = &results.hits[0];
        assert_eq!(hit.captions, vec!["caption one".to_string()]);
        assert_eq!(hit.field_str("sourcepage"), "doc-2.pdf");
        assert!(!hit.fields.contains_key("@search.score"));
        assert!((hit.score - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn vector_queries_use_top_as_k() {
        let body = search_body(&SearchQuery {
            top: 5,
            vector: Some(vec![0.5, 0.25]),
            ..SearchQuery::default()
        });
        assert!(body.get("search").is_none());
        assert_eq!(body["vectorQueries"][0]["k"], 5);
        assert_eq!(body["vectorQueries"][0]["fields"], "embedding");
    }

    #[tokio::test]
    async fn remove_sections_stops_when_nothing_matches() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/gptkbindex/docs/search")
                    .body_contains("sourcefile eq 'it''s.pdf'");
                then.status(200)
                    .json_body(json!({ "@odata.count": 0, "value": [] }));
            })
            .await;

        let removed = client_for(&server)
            .remove_sections(Some("it's.pdf"), Duration::ZERO)
            .await
            .expect("remove");

        search.assert();
        assert_eq!(removed, 0);
    }

    #[test]
    fn odata_literals_double_quotes() {
        assert_eq!(escape_odata("O'Brien"), "O''Brien");
    }
}
