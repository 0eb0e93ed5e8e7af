//! Ingestion service coordinating extraction, splitting, embedding, and index writes.

use super::discovery::{category_for, read_files};
use super::ids::{blob_name_from_file_page, section_id};
use super::types::{FileOutcome, IngestError, IngestOptions, RunSummary};
use crate::embedding::{BatchLimits, EmbeddingClient, embed_in_batches};
use crate::extraction::Extractor;
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::search::{SearchDocument, SearchIndexClient};
use crate::splitter::{PageBlock, SectionSplitter};
use crate::storage::BlobStore;
use crate::tokens::TokenCounter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Turn the pages of `filename` into index documents, without embeddings.
///
/// Section `i` gets key `{file-id}-page-{i}` and the citation locator of the page it starts on.
pub fn create_sections(
    splitter: &SectionSplitter,
    filename: &str,
    pages: &[PageBlock],
    category: Option<&str>,
) -> Result<Vec<SearchDocument>, IngestError> {
    let sections = splitter.split(pages)?;
    Ok(sections
        .enumerate()
        .map(|(sequence, section)| SearchDocument {
            id: section_id(filename, sequence),
            content: section.text,
            category: category.map(str::to_string),
            sourcepage: blob_name_from_file_page(filename, section.origin_page),
            sourcefile: filename.to_string(),
            embedding: None,
        })
        .collect())
}

/// How section embeddings are computed.
pub struct Vectorizer {
    client: Arc<dyn EmbeddingClient>,
    batching: Option<(TokenCounter, BatchLimits)>,
}

impl Vectorizer {
    /// One request per section.
    pub fn per_section(client: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            client,
            batching: None,
        }
    }

    /// Token-limited batches.
    pub fn batched(
        client: Arc<dyn EmbeddingClient>,
        counter: TokenCounter,
        limits: BatchLimits,
    ) -> Self {
        Self {
            client,
            batching: Some((counter, limits)),
        }
    }

    /// Fill in the embedding of every document, each exactly once.
    pub async fn embed_documents(
        &self,
        documents: &mut [SearchDocument],
    ) -> Result<(), IngestError> {
        match &self.batching {
            Some((counter, limits)) => {
                let texts: Vec<String> = documents.iter().map(|doc| doc.content.clone()).collect();
                let vectors =
                    embed_in_batches(self.client.as_ref(), &texts, counter, *limits).await?;
                for (document, vector) in documents.iter_mut().zip(vectors) {
                    document.embedding = Some(vector);
                }
            }
            None => {
                for document in documents.iter_mut() {
                    document.embedding = Some(self.client.embed_one(&document.content).await?);
                }
            }
        }
        Ok(())
    }
}

/// Coordinates the ingestion pipeline for a run of `prepdocs`.
pub struct IngestService {
    splitter: SectionSplitter,
    extractor: Extractor,
    search: SearchIndexClient,
    blobs: Option<BlobStore>,
    vectorizer: Option<Vectorizer>,
    options: IngestOptions,
    metrics: Arc<IngestMetrics>,
    removal_pause: Duration,
}

impl IngestService {
    /// Assemble a service from its parts. `blobs` is unused when blob upload is skipped.
    pub fn new(
        splitter: SectionSplitter,
        extractor: Extractor,
        search: SearchIndexClient,
        blobs: Option<BlobStore>,
        vectorizer: Option<Vectorizer>,
        options: IngestOptions,
    ) -> Self {
        Self {
            splitter,
            extractor,
            search,
            blobs,
            vectorizer,
            options,
            metrics: Arc::new(IngestMetrics::new()),
            removal_pause: Duration::from_secs(2),
        }
    }

    /// Override the pause between index removal rounds.
    pub fn with_removal_pause(mut self, pause: Duration) -> Self {
        self.removal_pause = pause;
        self
    }

    /// Current counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Ensure the index exists before uploading.
    pub async fn prepare_index(&self, analyzer: &str) -> Result<(), IngestError> {
        self.search.create_index_if_missing(analyzer).await?;
        Ok(())
    }

    /// Ensure the blob container exists when pages will be uploaded.
    pub async fn prepare_container(&self) -> Result<(), IngestError> {
        if !self.options.skip_blobs
            && let Some(blobs) = &self.blobs
        {
            blobs.ensure_container().await?;
        }
        Ok(())
    }

    /// Ingest every file matching `pattern`; a failing file is logged and skipped.
    pub async fn ingest(&self, pattern: &str) -> Result<RunSummary, IngestError> {
        let mut summary = RunSummary::default();
        for path in read_files(pattern)? {
            tracing::info!(file = %path.display(), "Processing file");
            match self.process_file(&path).await {
                Ok(outcome) => {
                    summary.files += 1;
                    summary.sections += outcome.indexed;
                }
                Err(err) => {
                    tracing::warn!(file = %path.display(), error = %err, "Skipping file after error");
                    self.metrics.record_skipped();
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Upload, extract, split, embed, and index a single file.
    pub async fn process_file(&self, path: &Path) -> Result<FileOutcome, IngestError> {
        let filename = base_name(path);
        let mut outcome = FileOutcome::default();

        if !self.options.skip_blobs
            && let Some(blobs) = &self.blobs
        {
            outcome.blobs = blobs.upload_file(path).await?.len();
        }

        let pages = self.extractor.get_document_text(path).await?;
        let category = self
            .options
            .category
            .clone()
            .or_else(|| category_for(path));
        tracing::debug!(file = %filename, pages = pages.len(), "Splitting into sections");
        let mut documents =
            create_sections(&self.splitter, &filename, &pages, category.as_deref())?;
        outcome.sections = documents.len();

        if self.options.use_vectors
            && let Some(vectorizer) = &self.vectorizer
        {
            vectorizer.embed_documents(&mut documents).await?;
        }

        let summary = self.search.upload_documents(&documents).await?;
        outcome.indexed = summary.succeeded;
        self.metrics.record_document(summary.succeeded as u64);
        tracing::info!(
            file = %filename,
            sections = outcome.sections,
            indexed = outcome.indexed,
            blobs = outcome.blobs,
            "File indexed"
        );
        Ok(outcome)
    }

    /// Remove the blobs and index entries of every file matching `pattern`.
    pub async fn remove(&self, pattern: &str) -> Result<(), IngestError> {
        for path in read_files(pattern)? {
            let filename = base_name(&path);
            if let Some(blobs) = &self.blobs {
                blobs.remove_blobs(Some(&filename)).await?;
            }
            self.search
                .remove_sections(Some(&filename), self.removal_pause)
                .await?;
        }
        Ok(())
    }

    /// Remove every blob and every index entry.
    pub async fn remove_all(&self) -> Result<(), IngestError> {
        if let Some(blobs) = &self.blobs {
            blobs.remove_blobs(None).await?;
        }
        self.search.remove_sections(None, self.removal_pause).await?;
        Ok(())
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn pages() -> Vec<PageBlock> {
        let page = "고려 시대의 무신 정권은 백 년 가까이 이어졌다. ".repeat(30);
        let second = page.chars().count();
        vec![PageBlock::new(0, 0, page.clone()), PageBlock::new(1, second, page)]
    }

    #[test]
    fn sections_carry_ids_and_page_locators() {
        let documents = create_sections(
            &SectionSplitter::default(),
            "무신정권.pdf",
            &pages(),
            Some("history"),
        )
        .expect("sections");

        assert!(documents.len() > 1);
        for (sequence, document) in documents.iter().enumerate() {
            assert_eq!(document.id, section_id("무신정권.pdf", sequence));
            assert_eq!(document.category.as_deref(), Some("history"));
            assert_eq!(document.sourcefile, "무신정권.pdf");
            assert!(document.embedding.is_none());
        }
        assert_eq!(documents[0].sourcepage, "무신정권-0.pdf");
        assert_eq!(
            documents.last().expect("last").sourcepage,
            "무신정권-1.pdf"
        );
    }

    #[test]
    fn plain_text_sources_cite_the_file() {
        let documents = create_sections(
            &SectionSplitter::default(),
            "info1.txt",
            &[PageBlock::new(0, 0, "짧은 문서입니다. ".repeat(20))],
            None,
        )
        .expect("sections");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].sourcepage, "info1.txt");
        assert_eq!(documents[0].category, None);
    }

    struct CountingClient {
        requests: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingClient for CountingClient {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.requests.lock().expect("lock").push(texts.len());
            Ok(texts.iter().map(|text| vec![text.chars().count() as f32]).collect())
        }
    }

    async fn embed_all(batched: bool) -> (Vec<SearchDocument>, Vec<usize>) {
        let client = Arc::new(CountingClient {
            requests: Mutex::new(Vec::new()),
        });
        let vectorizer = if batched {
            Vectorizer::batched(
                client.clone(),
                TokenCounter::for_model("text-embedding-ada-002").expect("counter"),
                BatchLimits {
                    token_limit: 8100,
                    max_batch_size: 2,
                },
            )
        } else {
            Vectorizer::per_section(client.clone())
        };
        let mut documents =
            create_sections(&SectionSplitter::default(), "doc.pdf", &pages(), None)
                .expect("sections");
        vectorizer
            .embed_documents(&mut documents)
            .await
            .expect("embeddings");
        let requests = client.requests.lock().expect("lock").clone();
        (documents, requests)
    }

    #[tokio::test]
    async fn every_section_is_embedded_once() {
        for batched in [false, true] {
            let (documents, requests) = embed_all(batched).await;
            assert_eq!(requests.iter().sum::<usize>(), documents.len());
            for document in &documents {
                let vector = document.embedding.as_ref().expect("embedding");
                assert_eq!(vector, &vec![document.content.chars().count() as f32]);
            }
            if batched {
                assert!(requests.iter().all(|&size| size <= 2));
            } else {
                assert!(requests.iter().all(|&size| size == 1));
            }
        }
    }
}
