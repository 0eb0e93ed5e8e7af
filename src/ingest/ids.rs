//! Deterministic identifiers and blob names derived from source file names.

use std::path::Path;

/// Document-key prefix for every section of `filename`.
///
/// Characters outside `[0-9a-zA-Z_-]` become `_`, and the uppercase base16 encoding of the
/// UTF-8 name is appended so distinct names never collide.
pub fn filename_to_id(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("file-{ascii}-{}", hex::encode_upper(filename.as_bytes()))
}

/// Key of the `sequence`-th section of `filename`.
pub fn section_id(filename: &str, sequence: usize) -> String {
    format!("{}-page-{sequence}", filename_to_id(filename))
}

/// Blob holding `page` of `filename`: `{stem}-{page}.pdf` for PDFs, the bare file name otherwise.
pub fn blob_name_from_file_page(filename: &str, page: usize) -> String {
    let path = Path::new(filename);
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    if is_pdf(path) {
        format!("{}-{page}.pdf", file_stem(filename))
    } else {
        base
    }
}

/// File name without directories or extension.
pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

/// `true` when the path has a `.pdf` extension, ignoring case.
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_replace_symbols_and_append_hex() {
        assert_eq!(filename_to_id("a b.pdf"), "file-a_b_pdf-6120622E706466");
    }

    #[test]
    fn ids_keep_non_ascii_names_distinct() {
        let first = filename_to_id("최충헌.pdf");
        let second = filename_to_id("이의민.pdf");
        assert!(first.starts_with("file-___"));
        assert_ne!(first, second);
        assert!(first.ends_with(&hex::encode_upper("최충헌.pdf".as_bytes())));
    }

    #[test]
    fn section_ids_count_sections() {
        assert_eq!(section_id("x.txt", 3), "file-x_txt-782E747874-page-3");
    }

    #[test]
    fn pdf_pages_get_their_own_blob() {
        assert_eq!(blob_name_from_file_page("data/history/Report.PDF", 2), "Report-2.pdf");
        assert_eq!(blob_name_from_file_page("data/notes.txt", 5), "notes.txt");
    }
}
