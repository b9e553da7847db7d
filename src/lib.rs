//! # docpilot
//!
//! Ask questions about a PDF or text document, or edit it with
//! plain-language instructions.
//!
//! ```text
//!                 ┌──────────────┐
//!   user input ──▶│ instruction  │
//!                 └──────┬───────┘
//!          replace/highlight   query
//!                 ▼               ▼
//!          ┌────────────┐   ┌──────────────────────────────┐
//!          │ edit / pdf │   │ chunk ─▶ embed ─▶ store ─▶ llm │
//!          └─────┬──────┘   └──────────────┬───────────────┘
//!                ▼                         ▼
//!         updated.pdf/.txt           answer + sources
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction from PDF and plain-text files |
//! | [`instruction`] | Classifying user input as replace, highlight, or query |
//! | [`matching`] | Case-variant substring search |
//! | [`pdf`] | PDF search, redaction, re-insertion, and highlighting |
//! | [`edit`] | Applying an edit and writing the output document |
//! | [`chunk`] | Recursive character splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | In-memory vector store |
//! | [`llm`] | Hosted chat-model client |
//! | [`qa`] | Retrieval question-answering pipeline |
//! | [`session`] | Per-document conversation |

pub mod chunk;
pub mod config;
pub mod edit;
pub mod embedding;
pub mod extract;
pub mod instruction;
pub mod llm;
pub mod matching;
pub mod models;
pub mod pdf;
pub mod qa;
pub mod session;
pub mod store;
