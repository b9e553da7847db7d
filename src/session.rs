//! # Session Orchestrator
//!
//! One open document and the conversation about it. Each call to
//! [`Session::handle_turn`] parses one utterance and routes it:
//!
//! | Instruction | Action | Outcome |
//! |-------------|--------|---------|
//! | `replace X with Y` | edit the document, write the output file | [`TurnOutcome::Edited`] / [`TurnOutcome::NoMatch`] |
//! | `highlight X` | same, PDF only | [`TurnOutcome::Edited`] / [`TurnOutcome::NoMatch`] |
//! | anything else | build the QA index on first use, answer | [`TurnOutcome::Answered`] |
//!
//! A failed turn returns a [`TurnError`] and changes nothing: the document,
//! the index, and the chat history stay as they were.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::edit::{apply_edit, output_path, Edit, EditError, EditReport};
use crate::extract::{load_document, ExtractError};
use crate::instruction::{parse_instruction, Instruction, ParseError};
use crate::models::{Answer, ChatTurn, Document};
use crate::qa::{Backends, QaError, QaPipeline, QaState};

#[derive(Debug)]
pub enum TurnOutcome {
    Edited(EditReport),
    /// Nothing matched; the output document was still written, unchanged.
    NoMatch(EditReport),
    Answered(Answer),
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("could not understand the instruction: {0}")]
    InstructionUnparsed(#[from] ParseError),
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Qa(#[from] QaError),
}

pub struct Session {
    document: Document,
    output: PathBuf,
    qa: QaPipeline,
    history: VecDeque<ChatTurn>,
    max_history: usize,
}

impl Session {
    /// Open `path` and extract its text.
    ///
    /// Fails when the file type is unsupported or no text can be extracted;
    /// nothing is indexed until the first question.
    pub fn open(path: &Path, config: &Config, backends: Backends) -> Result<Self, ExtractError> {
        let document = load_document(path)?;
        let output = output_path(&config.output.dir, document.kind);
        let qa = QaPipeline::new(
            backends,
            config.chunking.clone(),
            config.retrieval.clone(),
            config.embedding.batch_size,
        );
        info!(
            path = %path.display(),
            kind = ?document.kind,
            chars = document.text.len(),
            "session opened"
        );
        Ok(Self {
            document,
            output,
            qa,
            history: VecDeque::new(),
            max_history: config.session.max_history.max(1),
        })
    }

    /// Write edited documents to `output` instead of the configured default.
    pub fn with_output(mut self, output: PathBuf) -> Self {
        self.output = output;
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Question/answer turns so far, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ChatTurn> {
        self.history.iter()
    }

    pub fn qa_state(&self) -> QaState {
        self.qa.state()
    }

    /// Handle one user utterance.
    pub async fn handle_turn(&mut self, input: &str) -> Result<TurnOutcome, TurnError> {
        let instruction = parse_instruction(input).map_err(|e| {
            warn!(error = %e, "instruction not understood");
            e
        })?;

        match Edit::from_instruction(&instruction) {
            Some(edit) => self.edit(&edit),
            None => {
                let question = match instruction {
                    Instruction::Query { text } => text,
                    _ => input.to_string(),
                };
                self.answer(&question).await
            }
        }
    }

    fn edit(&self, edit: &Edit) -> Result<TurnOutcome, TurnError> {
        let report = apply_edit(&self.document.path, self.document.kind, edit, &self.output)?;
        if report.is_no_match() {
            Ok(TurnOutcome::NoMatch(report))
        } else {
            Ok(TurnOutcome::Edited(report))
        }
    }

    async fn answer(&mut self, question: &str) -> Result<TurnOutcome, TurnError> {
        if self.qa.state() != QaState::Ready {
            self.qa.build(&self.document.id, &self.document.text).await?;
        }
        let answer = self.qa.query(question).await?;
        self.record(question, &answer.text);
        Ok(TurnOutcome::Answered(answer))
    }

    fn record(&mut self, question: &str, answer: &str) {
        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(ChatTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            asked_at: Utc::now(),
        });
    }
}
