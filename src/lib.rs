#![deny(missing_docs)]

//! Core library for docrag: document ingestion and retrieval-augmented question answering.

/// HTTP routing and REST handlers.
pub mod api;
/// Ask and chat approaches over the search index.
pub mod chat;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Page-level text extraction from source documents.
pub mod extraction;
/// Document ingestion pipeline.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and answer counters.
pub mod metrics;
/// Search index client and schema.
pub mod search;
/// Sentence-aligned section splitting.
pub mod splitter;
/// Blob storage for source documents.
pub mod storage;
/// Token counting and model context limits.
pub mod tokens;
