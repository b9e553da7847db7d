//! Core data models used throughout docpilot.
//!
//! These types represent the document, its chunks, retrieval answers, and
//! the chat transcript that flow through the edit and question-answering
//! pipelines.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The two document formats docpilot can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /// Classify a path by its extension (`.pdf` or `.txt`, case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" => Some(DocumentKind::Text),
            _ => None,
        }
    }

    /// Extension used for generated output documents.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Text => "txt",
        }
    }
}

/// An opened document and its extracted text.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub text: String,
}

/// A chunk of a document's text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Byte offset of the chunk's first character in the document text.
    pub offset: usize,
    pub text: String,
    pub hash: String,
}

/// A chunk returned by similarity search, with its cosine score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Generated answer plus the chunks it was conditioned on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ScoredChunk>,
}

/// One question/answer exchange in a session transcript.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}
