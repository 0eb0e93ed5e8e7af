use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and question-answering activity.
#[derive(Default)]
pub struct IngestMetrics {
    documents_indexed: AtomicU64,
    sections_indexed: AtomicU64,
    files_skipped: AtomicU64,
    questions_answered: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an indexed document and the number of sections uploaded for it.
    pub fn record_document(&self, section_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.sections_indexed
            .fetch_add(section_count, Ordering::Relaxed);
    }

    /// Record a file that failed and was skipped.
    pub fn record_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed ask or chat request.
    pub fn record_answer(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            sections_indexed: self.sections_indexed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents indexed since startup.
    pub documents_indexed: u64,
    /// Sections uploaded across all indexed documents.
    pub sections_indexed: u64,
    /// Files that failed and were skipped.
    pub files_skipped: u64,
    /// Ask and chat requests answered.
    pub questions_answered: u64,
}
