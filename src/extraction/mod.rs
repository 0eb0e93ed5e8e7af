//! Page-level text extraction from source documents.
//!
//! Local extraction reads PDFs page by page with `pdf-extract` and treats any other file as a
//! single page of UTF-8 text. Layout extraction sends the file to the layout service instead.

use crate::ingest::ids::is_pdf;
use crate::splitter::PageBlock;
use reqwest::StatusCode;
use std::path::Path;
use thiserror::Error;

pub mod layout;

pub use layout::LayoutClient;

/// Errors raised while extracting document text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// File could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// PDF text could not be extracted locally.
    #[error("Failed to extract PDF text: {0}")]
    Pdf(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),
    /// Layout service responded with an unexpected status code.
    #[error("Unexpected layout response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Layout analysis did not produce a usable result.
    #[error("Layout analysis failed: {0}")]
    Layout(String),
}

/// How page text is obtained.
pub enum Extractor {
    /// Local parsing only.
    Local,
    /// Layout service analysis.
    Layout(LayoutClient),
}

impl Extractor {
    /// Extract the pages of `path` with character offsets.
    pub async fn get_document_text(&self, path: &Path) -> Result<Vec<PageBlock>, ExtractionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ExtractionError::Io {
                path: path.display().to_string(),
                source,
            })?;
        match self {
            Self::Local => extract_local(path, bytes).await,
            Self::Layout(client) => {
                tracing::info!(file = %path.display(), "Extracting text with layout analysis");
                client.page_blocks(bytes).await
            }
        }
    }
}

async fn extract_local(path: &Path, bytes: Vec<u8>) -> Result<Vec<PageBlock>, ExtractionError> {
    if is_pdf(path) {
        let texts = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        })
        .await
        .map_err(|err| ExtractionError::Pdf(err.to_string()))?
        .map_err(|err| ExtractionError::Pdf(err.to_string()))?;
        Ok(pages_from_texts(texts))
    } else {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(pages_from_texts(vec![text]))
    }
}

/// Number consecutive page texts and compute their character offsets.
pub fn pages_from_texts(texts: Vec<String>) -> Vec<PageBlock> {
    let mut offset = 0;
    texts
        .into_iter()
        .enumerate()
        .map(|(page_number, text)| {
            let block = PageBlock::new(page_number, offset, text);
            offset += block.text.chars().count();
            block
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_count_characters() {
        let pages = pages_from_texts(vec!["가나다".into(), "abc".into(), "d".into()]);
        let offsets: Vec<usize> = pages.iter().map(|page| page.start_offset).collect();
        assert_eq!(offsets, vec![0, 3, 6]);
        assert_eq!(pages[2].page_number, 2);
    }

    #[tokio::test]
    async fn text_files_are_a_single_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("info1.txt");
        std::fs::write(&path, "최충헌은 무신이다.").expect("write");

        let pages = Extractor::Local
            .get_document_text(&path)
            .await
            .expect("pages");
        assert_eq!(pages, vec![PageBlock::new(0, 0, "최충헌은 무신이다.")]);
    }

    #[tokio::test]
    async fn missing_files_report_their_path() {
        let error = Extractor::Local
            .get_document_text(Path::new("/definitely/missing.txt"))
            .await
            .expect_err("missing file");
        assert!(error.to_string().contains("/definitely/missing.txt"));
    }
}
