//! Document ingestion: discovery, blob upload, extraction, sections, embeddings, indexing.

mod discovery;
pub mod ids;
mod service;
mod types;

pub use discovery::{category_for, read_files};
pub use service::{IngestService, Vectorizer, create_sections};
pub use types::{FileOutcome, IngestError, IngestOptions, RunSummary};
