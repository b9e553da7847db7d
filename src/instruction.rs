//! Instruction parsing.
//!
//! Classifies one user utterance as an edit (`replace X with Y`,
//! `highlight X`) or a question. The grammar is deliberately small:
//!
//! ```text
//! instruction := [words] "replace" target "with" replacement
//!              | [words] "highlight" target
//!              | anything else            (a question)
//! ```
//!
//! Keywords are whole, case-insensitive, whitespace-delimited tokens, so
//! "replacement" or "without" never trigger an edit. The target and
//! replacement are lowercased and trimmed, and one pair of enclosing quotes
//! is removed. Ambiguous input (a keyword repeated) falls back to a query.

use serde::Serialize;
use thiserror::Error;

const REPLACE: &str = "replace";
const WITH: &str = "with";
const HIGHLIGHT: &str = "highlight";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Instruction {
    Replace { target: String, replacement: String },
    Highlight { target: String },
    Query { text: String },
}

/// An edit keyword was recognised but its arguments are missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no text to {0} was given")]
    MissingTarget(&'static str),
    #[error("no replacement text was given after \"with\"")]
    MissingReplacement,
}

/// A whitespace-delimited word and its byte span in the lowercased input.
struct Token<'a> {
    start: usize,
    end: usize,
    text: &'a str,
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in input.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                tokens.push(Token {
                    start: s,
                    end: i,
                    text: &input[s..i],
                });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            start: s,
            end: input.len(),
            text: &input[s..],
        });
    }
    tokens
}

fn positions(tokens: &[Token<'_>], keyword: &str) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| t.text == keyword)
        .map(|(i, _)| i)
        .collect()
}

/// Trim whitespace and one pair of matching enclosing quotes.
fn clean_argument(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['"', '\'', '`'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Parse a user utterance into an [`Instruction`].
///
/// Returns `Err` only when an edit was clearly intended but its target or
/// replacement is empty; every other unrecognised shape is a
/// [`Instruction::Query`] carrying the original text.
pub fn parse_instruction(input: &str) -> Result<Instruction, ParseError> {
    let lowered = input.to_lowercase();
    let tokens = tokenize(&lowered);
    let query = || Instruction::Query {
        text: input.to_string(),
    };

    let replace_at = positions(&tokens, REPLACE);
    if replace_at.len() == 1 {
        let r = replace_at[0];
        let with_at: Vec<usize> = positions(&tokens, WITH)
            .into_iter()
            .filter(|&i| i > r)
            .collect();
        if with_at.len() != 1 {
            return Ok(query());
        }
        let w = with_at[0];
        let target = clean_argument(&lowered[tokens[r].end..tokens[w].start]);
        let replacement = match tokens.get(w + 1) {
            Some(next) => clean_argument(&lowered[next.start..]),
            None => String::new(),
        };
        if target.is_empty() {
            return Err(ParseError::MissingTarget(REPLACE));
        }
        if replacement.is_empty() {
            return Err(ParseError::MissingReplacement);
        }
        return Ok(Instruction::Replace {
            target,
            replacement,
        });
    }
    if replace_at.len() > 1 {
        return Ok(query());
    }

    let highlight_at = positions(&tokens, HIGHLIGHT);
    if highlight_at.len() == 1 {
        let h = highlight_at[0];
        let target = match tokens.get(h + 1) {
            Some(next) => clean_argument(&lowered[next.start..]),
            None => String::new(),
        };
        if target.is_empty() {
            return Err(ParseError::MissingTarget(HIGHLIGHT));
        }
        return Ok(Instruction::Highlight { target });
    }

    Ok(query())
}
