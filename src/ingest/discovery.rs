//! Resolve a path pattern into the files to ingest.

use super::IngestError;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expand `pattern` into files.
///
/// A file yields itself, a directory yields every file below it, and a final component with
/// `*` or `?` wildcards matches entries of its parent directory (directories recurse).
/// Results are sorted for stable ordering.
pub fn read_files(pattern: &str) -> Result<Vec<PathBuf>, IngestError> {
    let path = Path::new(pattern);
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if path.is_dir() {
        return Ok(walk(path));
    }

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::Discovery(format!("no files match {pattern}")))?;
    if !name.contains(['*', '?']) {
        return Err(IngestError::Discovery(format!("no files match {pattern}")));
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let matcher = wildcard_regex(name)?;

    let entries = std::fs::read_dir(parent)
        .map_err(|err| IngestError::Discovery(format!("{}: {err}", parent.display())))?;
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let entry_path = entry.path();
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|entry_name| matcher.is_match(entry_name));
        if !matches {
            continue;
        }
        if entry_path.is_dir() {
            files.extend(walk(&entry_path));
        } else {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}

/// Category of a file: its parent directory name.
pub fn category_for(path: &Path) -> Option<String> {
    path.parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().into_owned())
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn wildcard_regex(name: &str) -> Result<Regex, IngestError> {
    let mut pattern = String::from("^");
    for c in name.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|err| IngestError::Discovery(err.to_string()))
}
