//! # docpilot CLI
//!
//! ## Usage
//!
//! ```bash
//! docpilot [--config ./docpilot.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docpilot extract <file>` | Print the text extracted from a document |
//! | `docpilot edit <file> "<instruction>"` | Apply one replace or highlight instruction |
//! | `docpilot ask <file> "<question>"` | Answer one question about a document |
//! | `docpilot chat <file>` | Interactive session, one instruction or question per line |
//!
//! ## Examples
//!
//! ```bash
//! docpilot edit report.pdf "replace 2023 with 2024"
//! docpilot edit report.pdf "highlight revenue" --output marked.pdf
//! GROQ_API_KEY=... docpilot ask report.pdf "What was the revenue?"
//! ```
//!
//! Logs go to stderr and are controlled by `RUST_LOG` (default `warn`).

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use docpilot::config::{self, Config};
use docpilot::edit::{apply_edit, output_path, Edit};
use docpilot::embedding::create_embedder;
use docpilot::extract::load_document;
use docpilot::instruction::parse_instruction;
use docpilot::llm::OpenAiCompatibleModel;
use docpilot::qa::Backends;
use docpilot::session::{Session, TurnOutcome};

/// docpilot: edit or question a PDF or text document in plain language.
#[derive(Parser)]
#[command(
    name = "docpilot",
    about = "Edit or question a PDF or text document in plain language",
    version,
    long_about = "docpilot extracts the text of a PDF or plain-text document and then either \
    applies an edit instruction (\"replace X with Y\", \"highlight X\") to produce an updated \
    copy, or answers questions about it with retrieval-augmented generation over a hosted \
    chat model."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Optional; every setting has a default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Print the text extracted from a document.
    Extract {
        /// A `.pdf` or `.txt` file.
        file: PathBuf,
    },

    /// Apply one edit instruction and write the updated document.
    ///
    /// The source file is never modified. Without `--output` the result is
    /// written to `updated.pdf` or `updated.txt` in `[output].dir`.
    Edit {
        /// A `.pdf` or `.txt` file.
        file: PathBuf,

        /// `replace <old> with <new>` or `highlight <text>`.
        instruction: String,

        /// Where to write the updated document.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Answer one question about a document.
    ///
    /// Requires the hosted model API key (`GROQ_API_KEY` by default).
    Ask {
        /// A `.pdf` or `.txt` file.
        file: PathBuf,

        /// The question to answer.
        question: String,
    },

    /// Start an interactive session over a document.
    ///
    /// Each line read from stdin is one turn: an edit instruction or a
    /// question. An empty line, `exit`, or end of input ends the session.
    Chat {
        /// A `.pdf` or `.txt` file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract { file } => {
            let document = load_document(&file)?;
            println!("{}", document.text);
        }
        Commands::Edit {
            file,
            instruction,
            output,
        } => {
            run_edit(&cfg, &file, &instruction, output)?;
        }
        Commands::Ask { file, question } => {
            let backends = backends(&cfg)?;
            let mut session = Session::open(&file, &cfg, backends)?;
            let outcome = session.handle_turn(&question).await?;
            print_outcome(&outcome);
        }
        Commands::Chat { file } => {
            let backends = backends(&cfg)?;
            let session = Session::open(&file, &cfg, backends)?;
            chat(session).await?;
        }
    }

    Ok(())
}

/// Construct the embedder and chat model, failing before any input is read
/// when the API key is missing.
fn backends(cfg: &Config) -> Result<Backends> {
    let api_key = cfg.llm.api_key()?;
    let embedder = create_embedder(&cfg.embedding)?;
    let model = OpenAiCompatibleModel::new(&cfg.llm, api_key)?;
    Ok(Backends {
        embedder,
        model: Box::new(model),
    })
}

fn run_edit(cfg: &Config, file: &Path, instruction: &str, output: Option<PathBuf>) -> Result<()> {
    let document = load_document(file)?;
    let parsed = parse_instruction(instruction)
        .with_context(|| format!("could not understand the instruction {:?}", instruction))?;
    let Some(edit) = Edit::from_instruction(&parsed) else {
        bail!(
            "not an edit instruction; use `replace <old> with <new>` or `highlight <text>` \
             (questions go to `docpilot ask`)"
        );
    };
    let output = output.unwrap_or_else(|| output_path(&cfg.output.dir, document.kind));
    let report = apply_edit(&document.path, document.kind, &edit, &output)?;
    print_outcome(&if report.is_no_match() {
        TurnOutcome::NoMatch(report)
    } else {
        TurnOutcome::Edited(report)
    });
    Ok(())
}

async fn chat(mut session: Session) -> Result<()> {
    eprintln!(
        "Document loaded: {}. Ask a question, or type an instruction like \
         \"replace X with Y\" or \"highlight X\". Empty line to quit.",
        session.document().path.display()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let input = line.trim();
        if input.is_empty() || input.eq_ignore_ascii_case("exit") {
            break;
        }
        match session.handle_turn(input).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    Ok(())
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Edited(report) => {
            println!(
                "Edited {} match(es); wrote {}",
                report.match_count,
                report.output.display()
            );
            for m in &report.matches {
                println!(
                    "  page {} at ({:.1}, {:.1})-({:.1}, {:.1})",
                    m.page, m.x0, m.y0, m.x1, m.y1
                );
            }
        }
        TurnOutcome::NoMatch(report) => {
            println!(
                "No matches found; wrote unchanged copy to {}",
                report.output.display()
            );
        }
        TurnOutcome::Answered(answer) => {
            println!("{}", answer.text);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &answer.sources {
                    let preview: String = source.chunk.text.chars().take(80).collect();
                    println!(
                        "  [{:.3}] chunk {} @{}: {}",
                        source.score,
                        source.chunk.chunk_index,
                        source.chunk.offset,
                        preview.replace('\n', " ")
                    );
                }
            }
        }
    }
}
