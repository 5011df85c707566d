//! Local document discovery.
//!
//! Lists the PDFs sitting directly in the configured directory. Nothing is
//! read or written here; bytes are loaded at upload time.

use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::models::LocalDocument;

/// Scan `dir` (non-recursively) for `*.pdf` files, case-insensitive.
///
/// Results are sorted by file name. A missing directory and a directory
/// without PDFs both yield [`SyncError::NoDocumentsFound`].
pub fn scan_pdf_dir(dir: &Path) -> Result<Vec<LocalDocument>, SyncError> {
    if !dir.is_dir() {
        return Err(SyncError::NoDocumentsFound {
            dir: dir.to_path_buf(),
        });
    }

    let matcher = pdf_matcher().map_err(|e| SyncError::Io {
        path: dir.to_path_buf(),
        source: std::io::Error::other(e),
    })?;
    let mut docs = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| SyncError::Io {
            path: dir.to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
        })?;
        // follows symlinks; dangling links are not files
        if !entry.path().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if !matcher.is_match(&name) {
            continue;
        }

        docs.push(LocalDocument {
            path: entry.path().to_path_buf(),
            name,
        });
    }

    if docs.is_empty() {
        return Err(SyncError::NoDocumentsFound {
            dir: dir.to_path_buf(),
        });
    }

    // Sort for deterministic ordering
    docs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(docs)
}

fn pdf_matcher() -> Result<GlobMatcher, globset::Error> {
    let glob = GlobBuilder::new("*.pdf")
        .case_insensitive(true)
        .literal_separator(true)
        .build()?;
    Ok(glob.compile_matcher())
}

/// Print the documents directory listing, one file per line.
pub fn list_documents(dir: &Path) -> anyhow::Result<()> {
    let docs = scan_pdf_dir(dir)?;
    println!("{} văn bản luật trong '{}':", docs.len(), dir.display());
    for doc in &docs {
        println!("  - {}", doc.name);
    }
    Ok(())
}
