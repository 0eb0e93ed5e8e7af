//! Errors and options for the ingestion pipeline.

use crate::embedding::EmbeddingError;
use crate::extraction::ExtractionError;
use crate::search::SearchError;
use crate::splitter::SplitError;
use crate::storage::BlobError;
use thiserror::Error;

/// Errors raised while ingesting a file.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Input pattern did not resolve to readable paths.
    #[error("File discovery failed: {0}")]
    Discovery(String),
    /// Text extraction failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Page index was inconsistent.
    #[error(transparent)]
    Split(#[from] SplitError),
    /// Embedding generation failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Search index operation failed.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// Blob storage operation failed.
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Category for every section; defaults to the parent directory name.
    pub category: Option<String>,
    /// Do not upload source files to blob storage.
    pub skip_blobs: bool,
    /// Compute embeddings for sections.
    pub use_vectors: bool,
}

/// Result of ingesting one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileOutcome {
    /// Sections produced by the splitter.
    pub sections: usize,
    /// Sections the index acknowledged.
    pub indexed: usize,
    /// Blobs uploaded for the file.
    pub blobs: usize,
}

/// Totals for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Files ingested successfully.
    pub files: usize,
    /// Files that failed and were skipped.
    pub skipped: usize,
    /// Sections indexed across all files.
    pub sections: usize,
}
