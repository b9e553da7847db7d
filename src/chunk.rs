//! Recursive character text splitter.
//!
//! Splits document text into overlapping [`Chunk`]s of at most
//! `chunk_size` characters. The text is cut on the coarsest separator that
//! occurs in it (`"\n\n"`, then `"\n"`, then `" "`, then between
//! characters); pieces that are still too long are split again with the
//! next separator. Small pieces are then merged back up to `chunk_size`,
//! carrying up to `chunk_overlap` characters of the previous chunk forward.
//!
//! Separators are kept at the start of the piece that follows them, and
//! each chunk is trimmed. Lengths are measured in characters, not bytes.
//!
//! Each chunk receives a random UUID, its byte offset in the source text,
//! and a SHA-256 hash of its text.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// A slice of the source text with its byte offset.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span<'a> {
    offset: usize,
    text: &'a str,
}

impl<'a> Span<'a> {
    fn slice(&self, start: usize, end: usize) -> Span<'a> {
        Span {
            offset: self.offset + start,
            text: &self.text[start..end],
        }
    }

    fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    /// Without surrounding whitespace; `None` when nothing is left.
    fn trimmed(self) -> Option<Span<'a>> {
        let text = self.text.trim();
        if text.is_empty() {
            return None;
        }
        let lead = self.text.len() - self.text.trim_start().len();
        Some(Span {
            offset: self.offset + lead,
            text,
        })
    }
}

/// Split `span` on `separator`, keeping the separator at the start of each
/// following piece. An empty separator splits into characters.
fn split_keeping_separator<'a>(span: Span<'a>, separator: &str) -> Vec<Span<'a>> {
    let text = span.text;
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(at, c)| span.slice(at, at + c.len_utf8()))
            .collect();
    }
    let mut out = Vec::new();
    let mut cursor = 0;
    for (at, _) in text.match_indices(separator) {
        if at > cursor {
            out.push(span.slice(cursor, at));
        }
        cursor = at;
    }
    if cursor < text.len() {
        out.push(span.slice(cursor, text.len()));
    }
    out
}

struct Splitter<'a> {
    source: &'a str,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl<'a> Splitter<'a> {
    fn split(&self, span: Span<'a>, separators: &[&str]) -> Vec<Span<'a>> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut rest: &[&str] = &[];
        for (i, s) in separators.iter().enumerate() {
            if s.is_empty() {
                separator = s;
                break;
            }
            if span.text.contains(s) {
                separator = s;
                rest = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<Span<'a>> = Vec::new();
        for piece in split_keeping_separator(span, separator) {
            if char_len(piece.text) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if rest.is_empty() {
                chunks.extend(piece.trimmed());
            } else {
                chunks.extend(self.split(piece, rest));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }
        chunks
    }

    /// Greedily join consecutive `pieces` into chunks, keeping an
    /// overlapping tail.
    fn merge(&self, pieces: &[Span<'a>]) -> Vec<Span<'a>> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<Span<'a>> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece.text);
            if total + len > self.chunk_size && !window.is_empty() {
                chunks.extend(self.joined(&window));
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front.text),
                        None => break,
                    }
                }
            }
            window.push_back(*piece);
            total += len;
        }
        chunks.extend(self.joined(&window));
        chunks
    }

    /// The source text covered by `window`, trimmed.
    fn joined(&self, window: &VecDeque<Span<'a>>) -> Option<Span<'a>> {
        let (first, last) = (window.front()?, window.back()?);
        Span {
            offset: first.offset,
            text: &self.source[first.offset..last.end()],
        }
        .trimmed()
    }
}

/// Split text into overlapping chunks with contiguous indices from 0.
///
/// Whitespace-only text yields no chunks.
pub fn chunk_text(document_id: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let splitter = Splitter {
        source: text,
        chunk_size: config.chunk_size.max(1),
        chunk_overlap: config.chunk_overlap,
    };
    splitter
        .split(Span { offset: 0, text }, &SEPARATORS)
        .into_iter()
        .enumerate()
        .map(|(index, span)| make_chunk(document_id, index as i64, span.offset, span.text))
        .collect()
}

fn make_chunk(document_id: &str, index: i64, offset: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        offset,
        text: text.to_string(),
        hash,
    }
}
