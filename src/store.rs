//! In-memory vector store scoped to one document.
//!
//! Holds each chunk with its embedding and answers top-k queries by
//! brute-force cosine similarity. A store is built once per document and
//! never updated; opening another document builds a new one.

use anyhow::{bail, Result};

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ScoredChunk};

struct StoredVector {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Chunks and their vectors for a single document.
pub struct VectorStore {
    document_id: String,
    dims: usize,
    entries: Vec<StoredVector>,
}

impl VectorStore {
    /// Build a store from chunks and their vectors (paired by position).
    ///
    /// Every chunk must belong to `document_id` and every vector must have
    /// the same dimensionality.
    pub fn build(document_id: &str, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            bail!(
                "{} chunks but {} vectors; every chunk needs exactly one vector",
                chunks.len(),
                vectors.len()
            );
        }
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            if chunk.document_id != document_id {
                bail!(
                    "chunk {} belongs to document {}, not {}",
                    chunk.id,
                    chunk.document_id,
                    document_id
                );
            }
            if vector.len() != dims {
                bail!(
                    "vector for chunk {} has {} dimensions, expected {}",
                    chunk.id,
                    vector.len(),
                    dims
                );
            }
            entries.push(StoredVector { chunk, vector });
        }
        Ok(Self {
            document_id: document_id.to_string(),
            dims,
            entries,
        })
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` chunks most similar to `query_vec`, best first.
    ///
    /// Ties keep document order.
    pub fn similarity_search(&self, query_vec: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query_vec, &entry.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("{}-{}", doc, index),
            document_id: doc.to_string(),
            chunk_index: index,
            offset: 0,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    fn store() -> VectorStore {
        VectorStore::build(
            "doc",
            vec![
                chunk("doc", 0, "north"),
                chunk("doc", 1, "east"),
                chunk("doc", 2, "north-east"),
            ],
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.7, 0.7]],
        )
        .unwrap()
    }

    #[test]
    fn returns_top_k_by_similarity() {
        let results = store().similarity_search(&[0.1, 1.0], 2);
        let texts: Vec<&str> = results.iter().map(|r| r.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["north", "north-east"]);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn k_larger_than_store_returns_everything() {
        assert_eq!(store().similarity_search(&[1.0, 0.0], 10).len(), 3);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let err = VectorStore::build("doc", vec![chunk("doc", 0, "a")], vec![]);
        assert!(err.is_err());
    }

    #[test]
    fn chunks_from_other_documents_rejected() {
        let err = VectorStore::build("doc", vec![chunk("other", 0, "a")], vec![vec![1.0]]);
        assert!(err.is_err());
    }

    #[test]
    fn inconsistent_dimensions_rejected() {
        let err = VectorStore::build(
            "doc",
            vec![chunk("doc", 0, "a"), chunk("doc", 1, "b")],
            vec![vec![1.0, 0.0], vec![1.0]],
        );
        assert!(err.is_err());
    }
}
