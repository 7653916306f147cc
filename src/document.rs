//! Documents selected for viewing or translation.
//! Identity is the full path; the file name is the fallback when no usable
//! path exists.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// Read a document from disk, identified by its full path.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let full = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self::new(document_id_for(&full), text))
    }
}

/// Stable identity for a path: the full path, or the bare file name when the
/// path cannot be rendered as text.
pub fn document_id_for(path: &Path) -> String {
    match path.to_str() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MARKDOWN_EXTENSIONS.iter().any(|m| e.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Expand a selection into markdown file paths. Files are kept as given;
/// folders are walked recursively, skipping hidden entries.
pub fn collect_markdown_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut in_dir: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| !is_hidden(e))
                .filter_map(|entry| match entry {
                    Ok(e) => Some(e),
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable entry");
                        None
                    }
                })
                .filter(|e| e.file_type().is_file() && is_markdown(e.path()))
                .map(|e| e.into_path())
                .collect();
            in_dir.sort();
            debug!(dir = %path.display(), count = in_dir.len(), "markdown files found");
            found.extend(in_dir);
        } else {
            found.push(path.clone());
        }
    }
    found
}

/// Load every selected document. Unreadable files are returned separately so
/// the caller can report them.
pub fn collect_documents(paths: &[PathBuf]) -> (Vec<Document>, Vec<(PathBuf, std::io::Error)>) {
    let mut documents = Vec::new();
    let mut failures = Vec::new();
    for path in collect_markdown_paths(paths) {
        match Document::load(&path) {
            Ok(doc) => documents.push(doc),
            Err(e) => failures.push((path, e)),
        }
    }
    (documents, failures)
}
