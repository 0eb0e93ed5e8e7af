use std::sync::Arc;
use std::time::Duration;

use docrag::config::{OpenAiConfig, SearchConfig, StorageConfig};
use docrag::embedding::{AzureOpenAiEmbeddings, RetryPolicy};
use docrag::extraction::Extractor;
use docrag::ingest::{IngestOptions, IngestService, Vectorizer};
use docrag::search::SearchIndexClient;
use docrag::splitter::SectionSplitter;
use docrag::storage::BlobStore;
use httpmock::prelude::*;
use serde_json::json;

fn search_client(server: &MockServer) -> SearchIndexClient {
    SearchIndexClient::new(&SearchConfig {
        endpoint: server.base_url(),
        index: "gptkbindex".into(),
        api_key: Some("search-key".into()),
    })
    .expect("search client")
}

fn vectorizer(server: &MockServer) -> Vectorizer {
    let config = OpenAiConfig {
        endpoint: server.base_url(),
        api_key: Some("openai-key".into()),
        api_version: "2024-02-01".into(),
        chat_deployment: "chat16k".into(),
        chat_model: "gpt-35-turbo-16k".into(),
        embedding_deployment: "embedding".into(),
        embedding_model: "text-embedding-ada-002".into(),
    };
    let client = AzureOpenAiEmbeddings::new(&config, RetryPolicy::immediate(1)).expect("embeddings");
    Vectorizer::per_section(Arc::new(client))
}

fn history_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let history = dir.path().join("history");
    std::fs::create_dir_all(&history).expect("history dir");
    std::fs::write(
        history.join("info1.txt"),
        "최충헌은 1196년부터 1219년까지 고려의 실권을 쥐었다. 최씨 정권을 연 첫 집권자이다.",
    )
    .expect("write info1");
    dir
}

#[tokio::test]
async fn text_files_are_embedded_and_indexed() {
    let server = MockServer::start_async().await;
    let embeddings = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/openai/deployments/embedding/embeddings")
                .header("api-key", "openai-key");
            then.status(200).json_body(json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }]
            }));
        })
        .await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/indexes/gptkbindex/docs/index")
                .query_param("api-version", "2023-11-01")
                .header("api-key", "search-key")
                .body_contains("\"@search.action\":\"upload\"")
                .body_contains("\"category\":\"history\"")
                .body_contains("\"sourcepage\":\"info1.txt\"")
                .body_contains("\"embedding\":[0.1,0.2,0.3]");
            then.status(200).json_body(json!({
                "value": [{ "key": "file-info1_txt-696E666F312E747874-page-0", "status": true }]
            }));
        })
        .await;

    let dir = history_dir();
    let service = IngestService::new(
        SectionSplitter::default(),
        Extractor::Local,
        search_client(&server),
        None,
        Some(vectorizer(&server)),
        IngestOptions {
            skip_blobs: true,
            use_vectors: true,
            ..IngestOptions::default()
        },
    );

    let pattern = dir.path().join("history");
    let summary = service
        .ingest(pattern.to_str().expect("utf8 path"))
        .await
        .expect("ingest");

    assert_eq!(summary.files, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.sections, 1);
    embeddings.assert_hits_async(1).await;
    upload.assert_async().await;

    let metrics = service.metrics_snapshot();
    assert_eq!(metrics.documents_indexed, 1);
    assert_eq!(metrics.sections_indexed, 1);
}

#[tokio::test]
async fn failing_files_are_skipped_and_counted() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/indexes/gptkbindex/docs/index");
            then.status(503).body("busy");
        })
        .await;

    let dir = history_dir();
    let service = IngestService::new(
        SectionSplitter::default(),
        Extractor::Local,
        search_client(&server),
        None,
        None,
        IngestOptions {
            skip_blobs: true,
            ..IngestOptions::default()
        },
    );

    let pattern = dir.path().join("history/*.txt");
    let summary = service
        .ingest(pattern.to_str().expect("utf8 path"))
        .await
        .expect("ingest");

    assert_eq!(summary.files, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(service.metrics_snapshot().files_skipped, 1);
}

#[tokio::test]
async fn source_files_are_uploaded_before_indexing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/content")
                .query_param("restype", "container");
            then.status(409);
        })
        .await;
    let blob = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/content/info1.txt")
                .header("x-ms-blob-type", "BlockBlob");
            then.status(201);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/indexes/gptkbindex/docs/index");
            then.status(200).json_body(json!({
                "value": [{ "key": "k", "status": true }]
            }));
        })
        .await;

    let blobs = BlobStore::new(&StorageConfig {
        account_url: server.base_url(),
        container: "content".into(),
        sas_token: None,
    })
    .expect("blob store");
    let dir = history_dir();
    let service = IngestService::new(
        SectionSplitter::default(),
        Extractor::Local,
        search_client(&server),
        Some(blobs),
        None,
        IngestOptions::default(),
    );

    let outcome = service
        .process_file(&dir.path().join("history/info1.txt"))
        .await
        .expect("outcome");

    assert_eq!(outcome.blobs, 1);
    assert_eq!(outcome.indexed, 1);
    blob.assert_async().await;
}

#[tokio::test]
async fn removal_searches_by_source_file() {
    let server = MockServer::start_async().await;
    let search = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/indexes/gptkbindex/docs/search")
                .body_contains("sourcefile eq 'info1.txt'");
            then.status(200).json_body(json!({ "@odata.count": 0, "value": [] }));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(POST).path("/indexes/gptkbindex/docs/index");
            then.status(200).json_body(json!({ "value": [] }));
        })
        .await;

    let dir = history_dir();
    let service = IngestService::new(
        SectionSplitter::default(),
        Extractor::Local,
        search_client(&server),
        None,
        None,
        IngestOptions::default(),
    )
    .with_removal_pause(Duration::ZERO);

    let pattern = dir.path().join("history/info1.txt");
    service
        .remove(pattern.to_str().expect("utf8 path"))
        .await
        .expect("removal");

    search.assert_async().await;
    delete.assert_hits_async(0).await;
}
