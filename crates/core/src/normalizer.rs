//! Rewrites a PDF as a single clean revision before extraction.
//!
//! Incremental updates, orphaned overlay objects and stale cross-reference
//! sections are dropped by pruning unreferenced objects and saving the
//! document from scratch. The rewrite is best effort: a file lopdf cannot
//! parse is handed to the extractors untouched.

use crate::error::IngestError;
use lopdf::Document;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Writes `cleaned_<name>` into `workdir` and returns its path, or returns
/// `input` unchanged when the PDF cannot be rewritten.
pub fn normalize(input: &Path, workdir: &Path) -> PathBuf {
    match rewrite(input, workdir) {
        Ok(cleaned) => {
            info!(input = %input.display(), cleaned = %cleaned.display(), "pdf normalized");
            cleaned
        }
        Err(error) => {
            warn!(input = %input.display(), %error, "pdf normalization failed, using original");
            input.to_path_buf()
        }
    }
}

fn rewrite(input: &Path, workdir: &Path) -> Result<PathBuf, IngestError> {
    let name = input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(input.display().to_string()))?;

    let mut document =
        Document::load(input).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let pruned = document.prune_objects();
    document.renumber_objects();

    let cleaned = workdir.join(format!("cleaned_{name}"));
    document
        .save(&cleaned)
        .map_err(|error| IngestError::PdfParse(error.to_string()))?;

    tracing::debug!(pruned = pruned.len(), "unreferenced objects removed");
    Ok(cleaned)
}
