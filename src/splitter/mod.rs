//! Sentence-aligned section splitting for extracted document text.
//!
//! The splitter turns a document's page blocks into overlapping sections sized for embedding.
//! Highlights:
//!
//! - Sentence alignment: a cut point slides forward up to `sentence_search_limit` characters
//!   to land just after `.`, `!` or `?`, and falls back to the last word break when no sentence
//!   ends in range.
//! - Start alignment: each section start walks backward (bounded by
//!   `max_section_length + 2 * sentence_search_limit` from the section end) to the previous
//!   sentence ending or word break.
//! - Overlap: consecutive sections share `section_overlap` characters.
//! - Tables: when a section ends inside an HTML `<table>` that opened past
//!   `2 * sentence_search_limit`, the next section restarts at that table.
//!
//! All positions are counted in `char`s, never bytes, so multi-byte scripts split cleanly.
//! Sections are produced lazily by the [`Sections`] iterator.

mod types;

pub use types::{
    DEFAULT_MAX_SECTION_LENGTH, DEFAULT_SECTION_OVERLAP, DEFAULT_SENTENCE_SEARCH_LIMIT, PageBlock,
    SENTENCE_ENDINGS, Section, SplitError, SplitterConfig, WORD_BREAKS,
};

use std::iter::FusedIterator;

const TABLE_OPEN: &str = "<table";
const TABLE_CLOSE: &str = "</table";

/// Splits page-tagged document text into overlapping, sentence-aligned sections.
#[derive(Debug, Clone, Copy)]
pub struct SectionSplitter {
    config: SplitterConfig,
}

impl Default for SectionSplitter {
    fn default() -> Self {
        Self {
            config: SplitterConfig::default(),
        }
    }
}

impl SectionSplitter {
    /// Build a splitter, rejecting size policies that cannot make progress.
    pub fn new(config: SplitterConfig) -> Result<Self, SplitError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Start a splitting pass over one document.
    ///
    /// Fails only when page offsets decrease. The returned iterator owns the concatenated text
    /// and yields sections on demand.
    pub fn split(&self, pages: &[PageBlock]) -> Result<Sections, SplitError> {
        validate_page_index(pages)?;
        let chars: Vec<char> = pages.iter().flat_map(|page| page.text.chars()).collect();
        let page_starts = pages
            .iter()
            .map(|page| (page.start_offset, page.page_number))
            .collect();
        tracing::trace!(
            pages = pages.len(),
            chars = chars.len(),
            "Starting section split"
        );
        Ok(Sections {
            chars,
            page_starts,
            config: self.config,
            cursor: 0,
            end: 0,
            phase: Phase::Scanning,
        })
    }
}

fn validate_page_index(pages: &[PageBlock]) -> Result<(), SplitError> {
    for (position, pair) in pages.windows(2).enumerate() {
        let (previous, current) = (pair[0].start_offset, pair[1].start_offset);
        if current < previous {
            return Err(SplitError::InvalidPageIndex {
                position: position + 1,
                previous,
                current,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scanning,
    Tail,
    Done,
}

/// Lazy, finite sequence of sections for one document.
///
/// Not restartable: call [`SectionSplitter::split`] again for a fresh pass.
#[derive(Debug)]
pub struct Sections {
    chars: Vec<char>,
    /// `(start_offset, page_number)` per page, in input order.
    page_starts: Vec<(usize, usize)>,
    config: SplitterConfig,
    cursor: usize,
    end: usize,
    phase: Phase,
}

impl Sections {
    fn scan_section(&mut self) -> Option<Section> {
        let SplitterConfig {
            max_section_length: max,
            sentence_search_limit: limit,
            section_overlap: overlap,
        } = self.config;
        let length = self.chars.len();
        let cursor = self.cursor;

        let mut end = cursor + max;
        if end > length {
            end = length;
        } else {
            let mut last_word = None;
            while end < length
                && end - cursor - max < limit
                && !is_sentence_ending(self.chars[end])
            {
                if is_word_break(self.chars[end]) {
                    last_word = Some(end);
                }
                end += 1;
            }
            if end < length
                && !is_sentence_ending(self.chars[end])
                && let Some(word) = last_word.filter(|&position| position > 0)
            {
                end = word;
            }
        }
        if end < length {
            end += 1;
        }

        let start = self.section_start(cursor, end);
        self.end = end;

        let standard = end.saturating_sub(overlap);
        let next = match self.unclosed_table_start(start, end) {
            Some(table_start) => {
                tracing::debug!(
                    page = self.page_of(start),
                    offset = start,
                    table_start,
                    "Section ends with unclosed table; restarting next section at the table"
                );
                standard.min(start + table_start)
            }
            None => standard,
        };
        self.cursor = if next > cursor {
            next
        } else {
            tracing::warn!(
                cursor,
                next,
                fallback = standard,
                "Table restart would not advance the cursor; using standard overlap"
            );
            debug_assert!(standard > cursor, "standard overlap step must advance");
            standard
        };

        self.section(start, end)
    }

    /// Walk back from `cursor` to a sentence ending, or failing that a word break.
    fn section_start(&self, cursor: usize, end: usize) -> usize {
        let SplitterConfig {
            max_section_length: max,
            sentence_search_limit: limit,
            ..
        } = self.config;
        let floor = end.saturating_sub(max + 2 * limit);

        let mut start = cursor;
        let mut last_word = None;
        while start > 0 && start > floor && !is_sentence_ending(self.chars[start]) {
            if is_word_break(self.chars[start]) {
                last_word = Some(start);
            }
            start -= 1;
        }
        if !is_sentence_ending(self.chars[start])
            && let Some(word) = last_word.filter(|&position| position > 0)
        {
            start = word;
        }
        if start > 0 {
            start += 1;
        }
        start
    }

    /// Position (relative to `start`) of a `<table` left open at the end of the section.
    fn unclosed_table_start(&self, start: usize, end: usize) -> Option<usize> {
        let window = &self.chars[start..end];
        let open = rfind_chars(window, TABLE_OPEN)?;
        let close = rfind_chars(window, TABLE_CLOSE);
        let opens_late = open > 2 * self.config.sentence_search_limit;
        let unclosed = close.is_none_or(|close| open > close);
        (opens_late && unclosed).then_some(open)
    }

    fn section(&self, start: usize, end: usize) -> Option<Section> {
        if start >= end {
            return None;
        }
        Some(Section {
            text: self.chars[start..end].iter().collect(),
            origin_page: self.page_of(start),
            start_offset: start,
        })
    }

    fn page_of(&self, offset: usize) -> usize {
        page_for_offset(&self.page_starts, offset)
    }
}

impl Iterator for Sections {
    type Item = Section;

    fn next(&mut self) -> Option<Self::Item> {
        let overlap = self.config.section_overlap;
        loop {
            match self.phase {
                Phase::Scanning => {
                    if self.cursor + overlap < self.chars.len() {
                        if let Some(section) = self.scan_section() {
                            return Some(section);
                        }
                    } else {
                        self.phase = Phase::Tail;
                    }
                }
                Phase::Tail => {
                    self.phase = Phase::Done;
                    if self.cursor + overlap < self.end {
                        return self.section(self.cursor, self.end);
                    }
                }
                Phase::Done => return None,
            }
        }
    }
}

impl FusedIterator for Sections {}

/// Page whose `[start_offset, next.start_offset)` range contains `offset`; the last page otherwise.
pub(crate) fn page_for_offset(page_starts: &[(usize, usize)], offset: usize) -> usize {
    for pair in page_starts.windows(2) {
        let ((start, page), (next_start, _)) = (pair[0], pair[1]);
        if offset >= start && offset < next_start {
            return page;
        }
    }
    page_starts.last().map(|&(_, page)| page).unwrap_or(0)
}

fn is_sentence_ending(c: char) -> bool {
    SENTENCE_ENDINGS.contains(&c)
}

fn is_word_break(c: char) -> bool {
    WORD_BREAKS.contains(&c)
}

fn rfind_chars(haystack: &[char], needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle.as_slice())
}
