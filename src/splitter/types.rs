//! Data types and errors shared by the section splitter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default target size of a section, in characters.
pub const DEFAULT_MAX_SECTION_LENGTH: usize = 1000;
/// Default distance scanned around a cut point for a sentence ending, in characters.
pub const DEFAULT_SENTENCE_SEARCH_LIMIT: usize = 100;
/// Default number of characters shared by consecutive sections.
pub const DEFAULT_SECTION_OVERLAP: usize = 100;

/// Characters that terminate a sentence.
pub const SENTENCE_ENDINGS: [char; 3] = ['.', '!', '?'];
/// Characters that separate words.
pub const WORD_BREAKS: [char; 12] = [
    ',', ';', ':', ' ', '(', ')', '[', ']', '{', '}', '\t', '\n',
];

/// One page of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBlock {
    /// Zero-based index of the page within the document.
    pub page_number: usize,
    /// Character offset of the page's first character within the full document text.
    pub start_offset: usize,
    /// Extracted page text, possibly containing inline HTML tables.
    pub text: String,
}

impl PageBlock {
    /// Construct a page block.
    pub fn new(page_number: usize, start_offset: usize, text: impl Into<String>) -> Self {
        Self {
            page_number,
            start_offset,
            text: text.into(),
        }
    }
}

/// A bounded chunk of document text prepared for embedding and indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section contents; never empty.
    pub text: String,
    /// Page containing the section's first character.
    pub origin_page: usize,
    /// Character offset of the section within the full document text.
    pub start_offset: usize,
}

impl Section {
    /// Number of characters in the section.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Size policy applied by [`super::SectionSplitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterConfig {
    /// Target maximum section size in characters.
    pub max_section_length: usize,
    /// How far past the cut point to look for a sentence ending.
    pub sentence_search_limit: usize,
    /// Characters shared by consecutive sections.
    pub section_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_section_length: DEFAULT_MAX_SECTION_LENGTH,
            sentence_search_limit: DEFAULT_SENTENCE_SEARCH_LIMIT,
            section_overlap: DEFAULT_SECTION_OVERLAP,
        }
    }
}

impl SplitterConfig {
    /// Reject policies under which the cursor could stall.
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.max_section_length == 0 {
            return Err(SplitError::InvalidConfig(
                "max_section_length must be greater than zero".to_string(),
            ));
        }
        if self.section_overlap >= self.max_section_length {
            return Err(SplitError::InvalidConfig(format!(
                "section_overlap ({}) must be smaller than max_section_length ({})",
                self.section_overlap, self.max_section_length
            )));
        }
        Ok(())
    }
}

/// Errors raised before splitting starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    /// Page offsets were not non-decreasing.
    #[error(
        "invalid page index: page at position {position} starts at offset {current}, before the previous page's offset {previous}"
    )]
    InvalidPageIndex {
        /// Position of the offending page within the input sequence.
        position: usize,
        /// Offset of the preceding page.
        previous: usize,
        /// Offset of the offending page.
        current: usize,
    },
    /// Size policy cannot guarantee forward progress.
    #[error("invalid splitter configuration: {0}")]
    InvalidConfig(String),
}
