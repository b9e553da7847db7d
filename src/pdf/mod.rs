//! # PDF Mutator
//!
//! In-place edits of PDF page content with [`lopdf`].
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`replace_text`] | Removes every case variant of the target from the content stream and draws the replacement in Helvetica at the same spot |
//! | [`highlight_text`] | Adds a yellow highlight annotation over each match, then flattens it into the page |
//! | [`find_text`] | Reports matches without editing |
//!
//! ## Matching
//!
//! Each page's text runs (see [`content::scan_text_runs`]) are joined in
//! content order into one character stream, with a space where a run
//! starts after a visible gap and a newline where the baseline changes.
//! Every character remembers the run and glyph that drew it, so a match
//! may span several text-show operators. Glyph text comes from the font's
//! `/ToUnicode` map or `/Encoding` (see [`fonts`]); glyphs with no known
//! text never match.
//!
//! ## Replacement
//!
//! Matched glyphs are cut from their operators and replaced by `TJ`
//! adjustments of the same width, so surrounding text does not move and
//! the removed characters are gone from the file rather than painted over.
//! The replacement is drawn at each match's baseline origin in black
//! Helvetica, sized like the first run on the page containing the target,
//! else like the run where the page's first match starts (12pt when
//! neither has a size). Replacement text is never refitted to the old
//! width and may overlap what follows.

pub mod annotations;
pub mod content;
pub mod fonts;
mod page;

use std::collections::BTreeMap;
use std::ops::Range;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::matching::find_case_variants;
use content::{redact_run, scan_text_runs, Rect, TextRun};
use fonts::{encode_win_ansi, win_ansi_font, FontTable};
use page::{add_page_resource, set_contents_with_overlay};

/// Size used for replacement text when no run gives one.
pub const DEFAULT_FONT_SIZE: f32 = 12.0;

const OVERLAY_FONT_PREFIX: &str = "DPHelv";

/// Gap between runs on one baseline, in ems, read as a word space.
const SPACE_GAP: f32 = 0.15;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("malformed PDF: {0}")]
    Malformed(#[from] lopdf::Error),
}

/// One occurrence of the target on a page (pages are numbered from 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageMatch {
    pub page: u32,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PageMatch {
    fn new(page: u32, rect: Rect) -> Self {
        Self {
            page,
            x0: rect.x0,
            y0: rect.y0,
            x1: rect.x1,
            y1: rect.y1,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect {
            x0: self.x0,
            y0: self.y0,
            x1: self.x1,
            y1: self.y1,
        }
    }
}

struct PageText {
    number: u32,
    id: ObjectId,
    operations: Vec<Operation>,
    runs: Vec<TextRun>,
}

fn scan_page(doc: &Document, number: u32, id: ObjectId) -> Result<PageText, PdfError> {
    let content = Content::decode(&doc.get_page_content(id)?)?;
    let fonts = FontTable::for_page(doc, id);
    let runs = scan_text_runs(&content.operations, &fonts);
    Ok(PageText {
        number,
        id,
        operations: content.operations,
        runs,
    })
}

/// The run and glyph that drew one character of the page text.
#[derive(Debug, Clone, Copy)]
struct GlyphRef {
    run: usize,
    glyph: usize,
}

/// A page's text in content order. Separators inserted between runs have
/// no glyph.
struct PageStream {
    chars: Vec<char>,
    glyphs: Vec<Option<GlyphRef>>,
}

impl PageStream {
    fn new(runs: &[TextRun]) -> Self {
        let mut chars = Vec::new();
        let mut glyphs = Vec::new();
        let mut prev: Option<&TextRun> = None;
        for (r, run) in runs.iter().enumerate() {
            if run.glyphs.is_empty() {
                continue;
            }
            if let Some(sep) = prev.and_then(|prev| separator(prev, run)) {
                let text = run.text();
                let joined_by_space = chars.last().is_some_and(|c: &char| c.is_whitespace())
                    || text.starts_with(char::is_whitespace);
                if sep == '\n' || !joined_by_space {
                    chars.push(sep);
                    glyphs.push(None);
                }
            }
            for (g, glyph) in run.glyphs.iter().enumerate() {
                for c in glyph.text.chars() {
                    chars.push(c);
                    glyphs.push(Some(GlyphRef { run: r, glyph: g }));
                }
            }
            prev = Some(run);
        }
        Self { chars, glyphs }
    }
}

/// What separates `next` from `prev` in reading order: nothing when it
/// continues the same baseline, a space across a gap, a newline when the
/// baseline moves.
fn separator(prev: &TextRun, next: &TextRun) -> Option<char> {
    let (ex, ey) = prev.end();
    let (sx, sy) = next.origin(0);
    let size = prev
        .effective_font_size()
        .max(next.effective_font_size())
        .max(1.0);
    if (sy - ey).abs() > size * 0.5 {
        Some('\n')
    } else if (sx - ex).abs() > size * SPACE_GAP {
        Some(' ')
    } else {
        None
    }
}

/// One occurrence of the target: the glyphs it covers, per run, in
/// content order.
#[derive(Debug)]
struct Hit {
    parts: Vec<(usize, Range<usize>)>,
}

impl Hit {
    fn rect(&self, runs: &[TextRun]) -> Option<Rect> {
        self.parts
            .iter()
            .map(|(r, glyphs)| runs[*r].bounds(glyphs.start, glyphs.end))
            .reduce(|a, b| a.union(&b))
    }

    fn origin(&self, runs: &[TextRun]) -> Option<(f32, f32)> {
        let (r, glyphs) = self.parts.first()?;
        Some(runs[*r].origin(glyphs.start))
    }

    fn runs(&self) -> impl Iterator<Item = usize> + '_ {
        self.parts.iter().map(|(r, _)| *r)
    }
}

/// Every case-variant occurrence of `target` on one page.
fn page_hits(runs: &[TextRun], target: &str) -> Vec<Hit> {
    let stream = PageStream::new(runs);
    find_case_variants(&stream.chars, target)
        .into_iter()
        .filter_map(|range| {
            let mut parts: Vec<(usize, Range<usize>)> = Vec::new();
            for at in stream.glyphs[range].iter().flatten() {
                match parts.last_mut() {
                    Some((run, glyphs)) if *run == at.run => glyphs.end = at.glyph + 1,
                    _ => parts.push((at.run, at.glyph..at.glyph + 1)),
                }
            }
            (!parts.is_empty()).then_some(Hit { parts })
        })
        .collect()
}

fn page_matches(page: &PageText, hits: &[Hit]) -> Vec<PageMatch> {
    hits.iter()
        .filter_map(|hit| hit.rect(&page.runs))
        .map(|rect| PageMatch::new(page.number, rect))
        .collect()
}

/// Every match of `target` in the document, in page order.
pub fn find_text(doc: &Document, target: &str) -> Result<Vec<PageMatch>, PdfError> {
    let mut matches = Vec::new();
    for (number, id) in doc.get_pages() {
        let page = scan_page(doc, number, id)?;
        let hits = page_hits(&page.runs, target);
        matches.extend(page_matches(&page, &hits));
    }
    Ok(matches)
}

/// Font size of the first run on the page whose text contains `target`,
/// compared case-insensitively.
fn font_size_for(runs: &[TextRun], target: &str) -> Option<f32> {
    let needle = target.to_lowercase();
    runs.iter()
        .find(|run| run.text().to_lowercase().contains(&needle))
        .map(TextRun::effective_font_size)
        .filter(|size| *size > 0.0)
}

/// Operations that draw `text` in black with its baseline starting at `(x, y)`.
fn text_overlay(font: &[u8], size: f32, x: f32, y: f32, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font.to_vec()), Object::Real(size)]),
        Operation::new(
            "rg",
            vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
        ),
        Operation::new(
            "Tm",
            vec![
                Object::Integer(1),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(1),
                Object::Real(x),
                Object::Real(y),
            ],
        ),
        Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
        ),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// Sorted glyph ranges with overlaps merged.
fn merge_ranges(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match merged.last_mut() {
            Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
            _ => merged.push(r),
        }
    }
    merged
}

fn replace_on_page(
    doc: &mut Document,
    page: PageText,
    target: &str,
    replacement: &str,
    font_id: &mut Option<ObjectId>,
) -> Result<Vec<PageMatch>, PdfError> {
    let (hits, skipped): (Vec<Hit>, Vec<Hit>) = page_hits(&page.runs, target)
        .into_iter()
        .partition(|hit| hit.runs().all(|r| page.runs[r].can_redact()));
    if !skipped.is_empty() {
        warn!(page = page.number, skipped = skipped.len(), "skipping text drawn at zero size");
    }
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let mut per_run: BTreeMap<usize, Vec<Range<usize>>> = BTreeMap::new();
    for hit in &hits {
        for (r, glyphs) in &hit.parts {
            per_run.entry(*r).or_default().push(glyphs.clone());
        }
    }
    let mut rewrites: BTreeMap<usize, Vec<Operation>> = BTreeMap::new();
    for (r, ranges) in per_run {
        let run = &page.runs[r];
        if let Some(ops) = redact_run(run, &page.operations[run.op_index], &merge_ranges(ranges)) {
            rewrites.insert(run.op_index, ops);
        }
    }

    let matches = page_matches(&page, &hits);
    let size = font_size_for(&page.runs, target)
        .or_else(|| {
            let (r, _) = hits.first()?.parts.first()?;
            Some(page.runs[*r].effective_font_size()).filter(|size| *size > 0.0)
        })
        .unwrap_or(DEFAULT_FONT_SIZE);
    let font_id = *font_id.get_or_insert_with(|| doc.add_object(win_ansi_font()));
    let font_name = add_page_resource(doc, page.id, b"Font", OVERLAY_FONT_PREFIX, font_id)?;
    let overlay: Vec<Operation> = hits
        .iter()
        .filter_map(|hit| hit.origin(&page.runs))
        .flat_map(|(x, y)| text_overlay(&font_name, size, x, y, replacement))
        .collect();

    let mut operations = Vec::with_capacity(page.operations.len() + rewrites.len());
    for (index, op) in page.operations.into_iter().enumerate() {
        match rewrites.remove(&index) {
            Some(ops) => operations.extend(ops),
            None => operations.push(op),
        }
    }
    let body = doc.add_object(Stream::new(
        Dictionary::new(),
        Content { operations }.encode()?,
    ));
    set_contents_with_overlay(doc, page.id, vec![body], overlay)?;
    debug!(page = page.number, matches = matches.len(), size, "replaced text");
    Ok(matches)
}

/// Replace every case variant of `target` with `replacement` on all pages.
///
/// Returns the replaced matches; an empty result leaves `doc` untouched.
/// Replaced content streams are orphaned and pruned, so the removed text
/// does not survive in the saved file.
pub fn replace_text(
    doc: &mut Document,
    target: &str,
    replacement: &str,
) -> Result<Vec<PageMatch>, PdfError> {
    let mut font_id = None;
    let mut matches = Vec::new();
    for (number, id) in doc.get_pages() {
        let page = scan_page(doc, number, id)?;
        matches.extend(replace_on_page(doc, page, target, replacement, &mut font_id)?);
    }
    if !matches.is_empty() {
        doc.prune_objects();
    }
    Ok(matches)
}

/// Highlight every case variant of `target` and flatten the highlights
/// into the page content. The page's existing text is not modified.
///
/// Returns the highlighted matches; an empty result leaves `doc` untouched.
pub fn highlight_text(doc: &mut Document, target: &str) -> Result<Vec<PageMatch>, PdfError> {
    let mut matches = Vec::new();
    for (number, id) in doc.get_pages() {
        let page = scan_page(doc, number, id)?;
        let page_matches = page_matches(&page, &page_hits(&page.runs, target));
        if page_matches.is_empty() {
            continue;
        }
        for m in &page_matches {
            annotations::add_highlight(doc, id, m.rect())?;
        }
        let flattened = annotations::flatten_page(doc, id)?;
        debug!(page = number, highlights = page_matches.len(), flattened, "highlighted text");
        matches.extend(page_matches);
    }
    Ok(matches)
}
