//! # Retrieval QA Pipeline
//!
//! Answers questions about one document by retrieval-augmented generation.
//!
//! ```text
//! build(text):  text ──chunk──▶ chunks ──embed──▶ vectors ──▶ VectorStore   (Indexed)
//!                                                      store + chat model   (Ready)
//! query(q):     q ──embed──▶ top-k chunks ──"stuff" prompt──▶ chat model ──▶ Answer
//! ```
//!
//! | State | Reached by | `query` |
//! |-------|------------|---------|
//! | `Empty` | construction | [`QaError::NotReady`] |
//! | `Indexed` | chunks embedded and stored | [`QaError::NotReady`] |
//! | `Ready` | store bound to the chat model | answers |
//!
//! Every `build` discards the previous index first; a failed build leaves
//! the pipeline `Empty`.

use thiserror::Error;
use tracing::{debug, info};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, RetrievalConfig};
use crate::embedding::{embed_batched, embed_query, Embedder};
use crate::llm::ChatModel;
use crate::models::{Answer, ScoredChunk};
use crate::store::VectorStore;

const PROMPT_PREAMBLE: &str = "Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.";

#[derive(Debug, Error)]
pub enum QaError {
    #[error("the question-answering index has not been built")]
    NotReady,
    #[error("the document produced no text to index")]
    EmptyIndex,
    #[error("embedding service failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("chat model failed: {0:#}")]
    Model(anyhow::Error),
    #[error("could not build the vector index: {0:#}")]
    Index(anyhow::Error),
}

impl QaError {
    /// Whether the failure came from the embedding service or hosted model.
    pub fn is_external(&self) -> bool {
        matches!(self, QaError::Embedding(_) | QaError::Model(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QaState {
    Empty,
    Indexed,
    Ready,
}

enum Stage {
    Empty,
    Indexed(VectorStore),
    Ready(VectorStore),
}

/// The services a pipeline talks to.
pub struct Backends {
    pub embedder: Box<dyn Embedder>,
    pub model: Box<dyn ChatModel>,
}

pub struct QaPipeline {
    backends: Backends,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    batch_size: usize,
    stage: Stage,
}

/// Format the "stuff" prompt: every retrieved chunk, then the question.
pub fn build_prompt(sources: &[ScoredChunk], question: &str) -> String {
    let context = sources
        .iter()
        .map(|s| s.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{}\n\n{}\n\nQuestion: {}\nHelpful Answer:",
        PROMPT_PREAMBLE, context, question
    )
}

impl QaPipeline {
    pub fn new(
        backends: Backends,
        chunking: ChunkingConfig,
        retrieval: RetrievalConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            backends,
            chunking,
            retrieval,
            batch_size,
            stage: Stage::Empty,
        }
    }

    pub fn state(&self) -> QaState {
        match self.stage {
            Stage::Empty => QaState::Empty,
            Stage::Indexed(_) => QaState::Indexed,
            Stage::Ready(_) => QaState::Ready,
        }
    }

    /// Index `text` for `document_id`, replacing any previous index.
    ///
    /// Returns the number of chunks indexed.
    pub async fn build(&mut self, document_id: &str, text: &str) -> Result<usize, QaError> {
        self.stage = Stage::Empty;

        let chunks = chunk_text(document_id, text, &self.chunking);
        if chunks.is_empty() {
            return Err(QaError::EmptyIndex);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.backends.embedder.as_ref(), &texts, self.batch_size)
            .await
            .map_err(QaError::Embedding)?;
        let store = VectorStore::build(document_id, chunks, vectors).map_err(QaError::Index)?;
        let count = store.len();
        self.stage = Stage::Indexed(store);
        debug!(document_id, chunks = count, "index built");

        self.bind_model();
        info!(
            document_id,
            chunks = count,
            embedder = self.backends.embedder.model_name(),
            model = self.backends.model.model_name(),
            "question answering ready"
        );
        Ok(count)
    }

    /// Attach the indexed store to the chat model.
    fn bind_model(&mut self) {
        self.stage = match std::mem::replace(&mut self.stage, Stage::Empty) {
            Stage::Indexed(store) => Stage::Ready(store),
            other => other,
        };
    }

    /// Answer `question` from the indexed document.
    pub async fn query(&self, question: &str) -> Result<Answer, QaError> {
        let store = match &self.stage {
            Stage::Ready(store) => store,
            _ => return Err(QaError::NotReady),
        };

        let query_vec = embed_query(self.backends.embedder.as_ref(), question)
            .await
            .map_err(QaError::Embedding)?;
        let sources = store.similarity_search(&query_vec, self.retrieval.top_k);
        let prompt = build_prompt(&sources, question);
        debug!(sources = sources.len(), prompt_chars = prompt.len(), "retrieved context");

        let text = self
            .backends
            .model
            .complete(&prompt)
            .await
            .map_err(QaError::Model)?;
        Ok(Answer {
            text: text.trim().to_string(),
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Two-dimensional bag of words: (#"refund", #"shipping").
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keywords"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.matches("refund").count() as f32 + 0.01,
                        t.matches("shipping").count() as f32 + 0.01,
                    ]
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("connection refused")
        }
    }

    struct RecordingModel {
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  Refunds take 14 days.  ".to_string())
        }
    }

    fn pipeline(embedder: Box<dyn Embedder>) -> (QaPipeline, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let backends = Backends {
            embedder,
            model: Box::new(RecordingModel {
                prompts: prompts.clone(),
            }),
        };
        let chunking = ChunkingConfig {
            chunk_size: 80,
            chunk_overlap: 0,
        };
        let retrieval = RetrievalConfig { top_k: 1 };
        (QaPipeline::new(backends, chunking, retrieval, 8), prompts)
    }

    const DOC: &str = "Shipping is free on orders over fifty dollars.\n\nRefunds are issued within fourteen days of a refund request.";

    #[tokio::test]
    async fn query_before_build_is_not_ready() {
        let (qa, _) = pipeline(Box::new(KeywordEmbedder));
        assert_eq!(qa.state(), QaState::Empty);
        assert!(matches!(qa.query("anything").await, Err(QaError::NotReady)));
    }

    #[tokio::test]
    async fn build_then_query_answers_with_sources() {
        let (mut qa, prompts) = pipeline(Box::new(KeywordEmbedder));
        let count = qa.build("doc", DOC).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(qa.state(), QaState::Ready);

        let answer = qa.query("How do refunds work?").await.unwrap();
        assert_eq!(answer.text, "Refunds take 14 days.");
        assert_eq!(answer.sources.len(), 1);
        assert!(answer.sources[0].chunk.text.starts_with("Refunds"));

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Refunds are issued"));
        assert!(!prompts[0].contains("Shipping is free"));
        assert!(prompts[0].ends_with("Question: How do refunds work?\nHelpful Answer:"));
    }

    #[tokio::test]
    async fn rebuild_discards_previous_index() {
        let (mut qa, _) = pipeline(Box::new(KeywordEmbedder));
        qa.build("first", DOC).await.unwrap();
        qa.build("second", "Only shipping here.").await.unwrap();
        let answer = qa.query("refund?").await.unwrap();
        assert_eq!(answer.sources[0].chunk.document_id, "second");
    }

    #[tokio::test]
    async fn whitespace_document_cannot_be_indexed() {
        let (mut qa, _) = pipeline(Box::new(KeywordEmbedder));
        assert!(matches!(
            qa.build("doc", "  \n ").await,
            Err(QaError::EmptyIndex)
        ));
        assert_eq!(qa.state(), QaState::Empty);
    }

    #[tokio::test]
    async fn embedding_failure_is_external_and_leaves_pipeline_empty() {
        let (mut qa, _) = pipeline(Box::new(FailingEmbedder));
        let err = qa.build("doc", DOC).await.unwrap_err();
        assert!(err.is_external());
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(qa.state(), QaState::Empty);
    }

    #[test]
    fn prompt_joins_context_with_blank_lines() {
        let chunk = |text: &str| ScoredChunk {
            chunk: Chunk {
                id: String::new(),
                document_id: String::new(),
                chunk_index: 0,
                offset: 0,
                text: text.to_string(),
                hash: String::new(),
            },
            score: 1.0,
        };
        let prompt = build_prompt(&[chunk("alpha"), chunk("beta")], "what?");
        assert_eq!(
            prompt,
            format!(
                "{}\n\nalpha\n\nbeta\n\nQuestion: what?\nHelpful Answer:",
                PROMPT_PREAMBLE
            )
        );
    }
}
