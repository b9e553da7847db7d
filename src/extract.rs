//! Text extraction for PDF and plain-text documents.
//!
//! Extraction is the first step of every session: the returned text feeds
//! the question-answering index. A document that yields only whitespace is
//! rejected with [`ExtractError::Empty`] so callers never build an empty
//! knowledge base.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::models::{Document, DocumentKind};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0} (expected .pdf or .txt)")]
    UnsupportedFileType(String),
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("no text could be extracted from this file")]
    Empty,
}

/// Extract plain text from in-memory content of the given kind.
///
/// PDF pages are concatenated in page order. Text files are decoded as
/// UTF-8, replacing invalid sequences.
pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    let text = match kind {
        DocumentKind::Pdf => extract_pdf(bytes)?,
        DocumentKind::Text => String::from_utf8_lossy(bytes).into_owned(),
    };
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

/// Open a document from disk, classify it by extension, and extract its text.
pub fn load_document(path: &Path) -> Result<Document, ExtractError> {
    let kind = DocumentKind::from_path(path)
        .ok_or_else(|| ExtractError::UnsupportedFileType(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let text = extract_text(&bytes, kind)?;
    debug!(path = %path.display(), ?kind, chars = text.len(), "extracted document text");

    Ok(Document {
        id: uuid::Uuid::new_v4().to_string(),
        path: path.to_path_buf(),
        kind,
        text,
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}
