//! Applying edit instructions to a document and writing the result.
//!
//! The source file is never modified. Every edit, including one that
//! matched nothing, writes a complete output document: first to a temporary
//! file in the destination directory, then renamed into place, so a failed
//! write never leaves a truncated output behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::instruction::Instruction;
use crate::matching::find_case_variants;
use crate::models::DocumentKind;
use crate::pdf::{self, PageMatch, PdfError};

/// Base name of generated documents; the extension follows the input kind.
pub const OUTPUT_STEM: &str = "updated";

#[derive(Debug, Error)]
pub enum EditError {
    #[error("{0}")]
    Unsupported(String),
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Pdf(#[from] PdfError),
    #[error("could not serialize the edited document: {0}")]
    Serialize(String),
    #[error("could not write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A document edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Replace { target: String, replacement: String },
    Highlight { target: String },
}

impl Edit {
    /// The edit an instruction asks for, if it asks for one.
    pub fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match instruction {
            Instruction::Replace {
                target,
                replacement,
            } => Some(Edit::Replace {
                target: target.clone(),
                replacement: replacement.clone(),
            }),
            Instruction::Highlight { target } => Some(Edit::Highlight {
                target: target.clone(),
            }),
            Instruction::Query { .. } => None,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Edit::Replace { target, .. } | Edit::Highlight { target } => target,
        }
    }
}

/// Outcome of one edit.
#[derive(Debug, Clone, Serialize)]
pub struct EditReport {
    pub output: PathBuf,
    /// Number of occurrences edited; zero means the output is unchanged.
    pub match_count: usize,
    /// Page locations of the matches (PDF only).
    pub matches: Vec<PageMatch>,
}

impl EditReport {
    pub fn is_no_match(&self) -> bool {
        self.match_count == 0
    }
}

/// Default output path for a document of `kind` in `dir`.
pub fn output_path(dir: &Path, kind: DocumentKind) -> PathBuf {
    dir.join(format!("{}.{}", OUTPUT_STEM, kind.extension()))
}

/// Replace every case variant of `target` in plain text.
///
/// Returns the new text and the number of replacements.
pub fn replace_in_text(text: &str, target: &str, replacement: &str) -> (String, usize) {
    let chars: Vec<char> = text.chars().collect();
    let hits = find_case_variants(&chars, target);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for hit in &hits {
        out.extend(&chars[last..hit.start]);
        out.push_str(replacement);
        last = hit.end;
    }
    out.extend(&chars[last..]);
    (out, hits.len())
}

/// Apply `edit` to the document at `source` and write the result to `output`.
pub fn apply_edit(
    source: &Path,
    kind: DocumentKind,
    edit: &Edit,
    output: &Path,
) -> Result<EditReport, EditError> {
    let bytes = std::fs::read(source).map_err(|e| EditError::Read {
        path: source.display().to_string(),
        source: e,
    })?;

    let (edited, matches, match_count) = match kind {
        DocumentKind::Pdf => {
            let (edited, matches) = edit_pdf(&bytes, edit)?;
            let count = matches.len();
            (edited, matches, count)
        }
        DocumentKind::Text => {
            let (edited, count) = edit_text(&bytes, edit)?;
            (edited, Vec::new(), count)
        }
    };

    // A miss writes the input back untouched.
    let contents = edited.as_deref().unwrap_or(&bytes);
    write_atomic(output, contents)?;

    info!(
        edit_target = edit.target(),
        matches = match_count,
        output = %output.display(),
        "edit applied"
    );
    Ok(EditReport {
        output: output.to_path_buf(),
        match_count,
        matches,
    })
}

fn edit_pdf(bytes: &[u8], edit: &Edit) -> Result<(Option<Vec<u8>>, Vec<PageMatch>), EditError> {
    let mut doc = lopdf::Document::load_mem(bytes).map_err(PdfError::from)?;
    let matches = match edit {
        Edit::Replace {
            target,
            replacement,
        } => pdf::replace_text(&mut doc, target, replacement)?,
        Edit::Highlight { target } => pdf::highlight_text(&mut doc, target)?,
    };
    if matches.is_empty() {
        return Ok((None, matches));
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| EditError::Serialize(e.to_string()))?;
    debug!(bytes = out.len(), "serialized edited PDF");
    Ok((Some(out), matches))
}

fn edit_text(bytes: &[u8], edit: &Edit) -> Result<(Option<Vec<u8>>, usize), EditError> {
    match edit {
        Edit::Replace {
            target,
            replacement,
        } => {
            let text = String::from_utf8_lossy(bytes);
            let (edited, count) = replace_in_text(&text, target, replacement);
            if count == 0 {
                return Ok((None, 0));
            }
            Ok((Some(edited.into_bytes()), count))
        }
        Edit::Highlight { .. } => Err(EditError::Unsupported(
            "highlighting is only available for PDF documents".to_string(),
        )),
    }
}

/// Write `contents` to `path` through a temporary file in the same directory.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), EditError> {
    let write_error = |source: std::io::Error| EditError::Write {
        path: path.display().to_string(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    tmp.write_all(contents).map_err(write_error)?;
    tmp.as_file().sync_all().map_err(write_error)?;
    tmp.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}
