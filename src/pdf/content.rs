//! Content-stream interpretation: locate text and where it is drawn.
//!
//! [`scan_text_runs`] replays the graphics and text state operators of a
//! page and records one [`TextRun`] per text-show operator (`Tj`, `TJ`,
//! `'`, `"`), with every glyph's horizontal offset and decoded text. This is
//! enough to map a glyph range of a run to a rectangle in user space and to
//! rewrite the run without the matched glyphs.

use lopdf::content::Operation;
use lopdf::{Object, StringFormat};

use super::fonts::{code_bytes, FontInfo, FontTable};

/// Typical Helvetica ascent/descent in em units, used for match boxes.
const ASCENT: f32 = 0.718;
const DESCENT: f32 = -0.207;

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn translate(tx: f32, ty: f32) -> Self {
        Matrix {
            e: tx,
            f: ty,
            ..Matrix::IDENTITY
        }
    }

    fn from_operands(ops: &[Object]) -> Option<Self> {
        if ops.len() != 6 {
            return None;
        }
        Some(Matrix {
            a: num(&ops[0])?,
            b: num(&ops[1])?,
            c: num(&ops[2])?,
            d: num(&ops[3])?,
            e: num(&ops[4])?,
            f: num(&ops[5])?,
        })
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Length of the transformed unit y vector.
    pub fn vertical_scale(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

/// Axis-aligned rectangle in user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    fn bounding(points: &[(f32, f32)]) -> Rect {
        let mut r = Rect {
            x0: f32::MAX,
            y0: f32::MAX,
            x1: f32::MIN,
            y1: f32::MIN,
        };
        for &(x, y) in points {
            r.x0 = r.x0.min(x);
            r.y0 = r.y0.min(y);
            r.x1 = r.x1.max(x);
            r.y1 = r.y1.max(y);
        }
        r
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

#[derive(Debug, Clone)]
pub struct Glyph {
    /// Character code, `code_len` bytes wide in the content stream.
    pub code: u32,
    /// Text the glyph stands for; empty when the font does not say.
    pub text: String,
    /// Offset of the glyph origin from the run start, in text space.
    pub x: f32,
    /// Advance of the glyph itself, spacing included, in text space.
    pub advance: f32,
    /// `TJ` adjustment (thousandths of an em) applied just before this glyph.
    pub kern_before: f32,
}

/// The glyphs drawn by one text-show operator.
#[derive(Debug, Clone)]
pub struct TextRun {
    /// Index of the operator in the page's operation list.
    pub op_index: usize,
    pub font_name: Option<Vec<u8>>,
    pub font_size: f32,
    pub horizontal_scale: f32,
    pub rise: f32,
    /// Text space to user space at the start of the run.
    pub matrix: Matrix,
    pub glyphs: Vec<Glyph>,
    /// Total advance including trailing adjustments, in text space.
    pub advance: f32,
    /// `TJ` adjustment after the last glyph.
    pub trailing_kern: f32,
    pub code_len: usize,
}

impl TextRun {
    pub fn text(&self) -> String {
        self.glyphs.iter().map(|g| g.text.as_str()).collect()
    }

    /// False when the run's scale leaves no room for a `TJ` adjustment.
    pub fn can_redact(&self) -> bool {
        (self.font_size * self.horizontal_scale).abs() >= f32::EPSILON
    }

    /// Rendered font size in user space units.
    pub fn effective_font_size(&self) -> f32 {
        self.font_size.abs() * self.matrix.vertical_scale()
    }

    /// Text-space offset where glyph `i` starts (`len` maps to the run end).
    pub fn offset(&self, i: usize) -> f32 {
        self.glyphs.get(i).map(|g| g.x).unwrap_or(self.advance)
    }

    /// User-space origin (baseline start) of glyph `i`.
    pub fn origin(&self, i: usize) -> (f32, f32) {
        self.matrix.apply(self.offset(i), self.rise)
    }

    /// User-space point where the next run would start.
    pub fn end(&self) -> (f32, f32) {
        self.matrix.apply(self.advance, self.rise)
    }

    /// User-space box covering glyphs `start..end`.
    pub fn bounds(&self, start: usize, end: usize) -> Rect {
        let x0 = self.offset(start);
        let x1 = match end.checked_sub(1).and_then(|last| self.glyphs.get(last)) {
            Some(last) => last.x + last.advance,
            None => x0,
        };
        let y0 = self.rise + DESCENT * self.font_size;
        let y1 = self.rise + ASCENT * self.font_size;
        let corners = [
            self.matrix.apply(x0, y0),
            self.matrix.apply(x1, y0),
            self.matrix.apply(x0, y1),
            self.matrix.apply(x1, y1),
        ];
        Rect::bounding(&corners)
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    font_name: Option<Vec<u8>>,
    font_size: f32,
    rise: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            font_name: None,
            font_size: 0.0,
            rise: 0.0,
        }
    }
}

fn num(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn operand(op: &Operation, i: usize) -> f32 {
    op.operands.get(i).and_then(num).unwrap_or(0.0)
}

/// Replay `operations` and collect every text-show run.
pub fn scan_text_runs(operations: &[Operation], fonts: &FontTable) -> Vec<TextRun> {
    let fallback = FontInfo::fallback();
    let mut runs = Vec::new();
    let mut stack: Vec<GraphicsState> = Vec::new();
    let mut gs = GraphicsState::default();
    let mut tm = Matrix::IDENTITY;
    let mut tlm = Matrix::IDENTITY;

    for (op_index, op) in operations.iter().enumerate() {
        match op.operator.as_str() {
            "q" => stack.push(gs.clone()),
            "Q" => {
                if let Some(saved) = stack.pop() {
                    gs = saved;
                }
            }
            "cm" => {
                if let Some(m) = Matrix::from_operands(&op.operands) {
                    gs.ctm = m.then(&gs.ctm);
                }
            }
            "BT" => {
                tm = Matrix::IDENTITY;
                tlm = Matrix::IDENTITY;
            }
            "Tc" => gs.char_spacing = operand(op, 0),
            "Tw" => gs.word_spacing = operand(op, 0),
            "Tz" => gs.horizontal_scale = operand(op, 0) / 100.0,
            "TL" => gs.leading = operand(op, 0),
            "Ts" => gs.rise = operand(op, 0),
            "Tf" => {
                gs.font_name = op
                    .operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .map(|n| n.to_vec());
                gs.font_size = operand(op, 1);
            }
            "Td" => {
                tlm = Matrix::translate(operand(op, 0), operand(op, 1)).then(&tlm);
                tm = tlm;
            }
            "TD" => {
                gs.leading = -operand(op, 1);
                tlm = Matrix::translate(operand(op, 0), operand(op, 1)).then(&tlm);
                tm = tlm;
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(&op.operands) {
                    tlm = m;
                    tm = m;
                }
            }
            "T*" => {
                tlm = Matrix::translate(0.0, -gs.leading).then(&tlm);
                tm = tlm;
            }
            "Tj" | "'" | "\"" | "TJ" => {
                let elements: Vec<Object> = match op.operator.as_str() {
                    "'" => {
                        tlm = Matrix::translate(0.0, -gs.leading).then(&tlm);
                        tm = tlm;
                        op.operands.first().cloned().into_iter().collect()
                    }
                    "\"" => {
                        gs.word_spacing = operand(op, 0);
                        gs.char_spacing = operand(op, 1);
                        tlm = Matrix::translate(0.0, -gs.leading).then(&tlm);
                        tm = tlm;
                        op.operands.get(2).cloned().into_iter().collect()
                    }
                    "TJ" => op
                        .operands
                        .first()
                        .and_then(|o| o.as_array().ok())
                        .cloned()
                        .unwrap_or_default(),
                    _ => op.operands.first().cloned().into_iter().collect(),
                };
                let font = gs
                    .font_name
                    .as_deref()
                    .and_then(|n| fonts.get(n))
                    .unwrap_or(&fallback);
                let run = layout_run(op_index, &elements, &gs, font, tm.then(&gs.ctm));
                tm = Matrix::translate(run.advance, 0.0).then(&tm);
                runs.push(run);
            }
            _ => {}
        }
    }

    runs
}

fn layout_run(
    op_index: usize,
    elements: &[Object],
    gs: &GraphicsState,
    font: &FontInfo,
    matrix: Matrix,
) -> TextRun {
    let size = gs.font_size;
    let th = gs.horizontal_scale;
    let code_len = font.code_len();
    let mut glyphs = Vec::new();
    let mut cursor = 0.0f32;
    let mut pending_kern = 0.0f32;

    for element in elements {
        match element {
            Object::String(bytes, _) => {
                for chunk in bytes.chunks(code_len) {
                    let code = chunk.iter().fold(0u32, |acc, b| acc << 8 | *b as u32);
                    // Word spacing applies to the single-byte code 32 only.
                    let word = if code_len == 1 && code == 32 {
                        gs.word_spacing
                    } else {
                        0.0
                    };
                    let advance =
                        (font.width(code) / 1000.0 * size + gs.char_spacing + word) * th;
                    glyphs.push(Glyph {
                        code,
                        text: font.text(code),
                        x: cursor,
                        advance,
                        kern_before: pending_kern,
                    });
                    pending_kern = 0.0;
                    cursor += advance;
                }
            }
            other => {
                if let Some(n) = num(other) {
                    cursor -= n / 1000.0 * size * th;
                    pending_kern += n;
                }
            }
        }
    }

    TextRun {
        op_index,
        font_name: gs.font_name.clone(),
        font_size: size,
        horizontal_scale: th,
        rise: gs.rise,
        matrix,
        glyphs,
        advance: cursor,
        trailing_kern: pending_kern,
        code_len,
    }
}

/// Operations that redraw `run` without the glyphs in `removed`.
///
/// Every glyph outside the removed ranges keeps its position: each removed
/// range becomes a single `TJ` adjustment equal to its advance. Returns
/// `None` when the run's scale makes such an adjustment impossible.
pub fn redact_run(
    run: &TextRun,
    original: &Operation,
    removed: &[std::ops::Range<usize>],
) -> Option<Vec<Operation>> {
    if !run.can_redact() {
        return None;
    }
    let unit = run.font_size * run.horizontal_scale;

    let format = if run.code_len > 1 {
        StringFormat::Hexadecimal
    } else {
        StringFormat::Literal
    };
    let mut array: Vec<Object> = Vec::new();
    let mut buf: Vec<u8> = Vec::new();
    let flush = |buf: &mut Vec<u8>, array: &mut Vec<Object>| {
        if !buf.is_empty() {
            array.push(Object::String(std::mem::take(buf), format));
        }
    };

    let mut skip_kern_at = None;
    let mut i = 0;
    while i < run.glyphs.len() {
        if let Some(range) = removed.iter().find(|r| r.start == i) {
            let glyph = &run.glyphs[i];
            if glyph.kern_before != 0.0 {
                flush(&mut buf, &mut array);
                array.push(Object::Real(glyph.kern_before));
            }
            let gap = run.offset(range.end) - glyph.x;
            flush(&mut buf, &mut array);
            array.push(Object::Real(-gap * 1000.0 / unit));
            skip_kern_at = Some(range.end);
            i = range.end;
            continue;
        }
        let glyph = &run.glyphs[i];
        if glyph.kern_before != 0.0 && skip_kern_at != Some(i) {
            flush(&mut buf, &mut array);
            array.push(Object::Real(glyph.kern_before));
        }
        buf.extend(code_bytes(glyph.code, run.code_len));
        i += 1;
    }
    flush(&mut buf, &mut array);
    if run.trailing_kern != 0.0 && skip_kern_at != Some(run.glyphs.len()) {
        array.push(Object::Real(run.trailing_kern));
    }

    let show = Operation::new("TJ", vec![Object::Array(array)]);
    let ops = match original.operator.as_str() {
        "'" => vec![Operation::new("T*", vec![]), show],
        "\"" => vec![
            Operation::new("Tw", original.operands.first().cloned().into_iter().collect()),
            Operation::new("Tc", original.operands.get(1).cloned().into_iter().collect()),
            Operation::new("T*", vec![]),
            show,
        ],
        _ => vec![show],
    };
    Some(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_op(op: &str, operands: Vec<Object>) -> Operation {
        Operation::new(op, operands)
    }

    fn page_ops(show: Operation) -> Vec<Operation> {
        vec![
            text_op("BT", vec![]),
            text_op("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            text_op("Td", vec![100.into(), 700.into()]),
            show,
            text_op("ET", vec![]),
        ]
    }

    #[test]
    fn matrix_composition_applies_left_first() {
        let scale = Matrix {
            a: 2.0,
            d: 2.0,
            ..Matrix::IDENTITY
        };
        let moved = scale.then(&Matrix::translate(10.0, 5.0));
        assert_eq!(moved.apply(1.0, 1.0), (12.0, 7.0));
        let other = Matrix::translate(10.0, 5.0).then(&scale);
        assert_eq!(other.apply(1.0, 1.0), (22.0, 12.0));
    }

    #[test]
    fn tj_run_positions_glyphs_with_fallback_widths() {
        let ops = page_ops(text_op("Tj", vec![Object::string_literal("AV")]));
        let runs = scan_text_runs(&ops, &FontTable::default());
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.text(), "AV");
        assert_eq!(run.origin(0), (100.0, 700.0));
        // 'A' is 667/1000 em at 10pt.
        assert!((run.offset(1) - 6.67).abs() < 1e-3);
        assert!((run.advance - 13.34).abs() < 1e-3);
        assert_eq!(run.effective_font_size(), 10.0);
    }

    #[test]
    fn tj_array_kerning_moves_glyphs() {
        let ops = page_ops(text_op(
            "TJ",
            vec![Object::Array(vec![
                Object::string_literal("A"),
                Object::Integer(-1000),
                Object::string_literal("B"),
            ])],
        ));
        let runs = scan_text_runs(&ops, &FontTable::default());
        let run = &runs[0];
        assert_eq!(run.glyphs[1].kern_before, -1000.0);
        // 6.67 for 'A' plus a full em (10pt) of kerning.
        assert!((run.offset(1) - 16.67).abs() < 1e-3);
    }

    #[test]
    fn consecutive_runs_continue_from_previous_advance() {
        let ops = vec![
            text_op("BT", vec![]),
            text_op("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            text_op("Td", vec![0.into(), 0.into()]),
            text_op("Tj", vec![Object::string_literal("ii")]),
            text_op("Tj", vec![Object::string_literal("x")]),
            text_op("ET", vec![]),
        ];
        let runs = scan_text_runs(&ops, &FontTable::default());
        assert_eq!(runs.len(), 2);
        let (x, _) = runs[1].origin(0);
        assert!((x - 4.44).abs() < 1e-3);
    }

    #[test]
    fn cm_and_scale_affect_effective_size() {
        let ops = vec![
            text_op(
                "cm",
                vec![2.into(), 0.into(), 0.into(), 2.into(), 0.into(), 0.into()],
            ),
            text_op("BT", vec![]),
            text_op("Tf", vec![Object::Name(b"F1".to_vec()), 9.into()]),
            text_op("Tj", vec![Object::string_literal("x")]),
            text_op("ET", vec![]),
        ];
        let runs = scan_text_runs(&ops, &FontTable::default());
        assert_eq!(runs[0].effective_font_size(), 18.0);
    }

    #[test]
    fn quote_operator_moves_to_next_line() {
        let ops = vec![
            text_op("BT", vec![]),
            text_op("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
            text_op("TL", vec![12.into()]),
            text_op("Td", vec![50.into(), 500.into()]),
            text_op("'", vec![Object::string_literal("next")]),
            text_op("ET", vec![]),
        ];
        let runs = scan_text_runs(&ops, &FontTable::default());
        assert_eq!(runs[0].origin(0), (50.0, 488.0));
    }

    #[test]
    fn redaction_preserves_following_glyph_positions() {
        let show = text_op("Tj", vec![Object::string_literal("The fox ran")]);
        let ops = page_ops(show.clone());
        let runs = scan_text_runs(&ops, &FontTable::default());
        let run = &runs[0];
        let rewritten = redact_run(run, &show, &[4..7]).unwrap();
        assert_eq!(rewritten.len(), 1);

        let new_ops = page_ops(rewritten[0].clone());
        let new_runs = scan_text_runs(&new_ops, &FontTable::default());
        let new_run = &new_runs[0];
        assert_eq!(new_run.text(), "The  ran");
        // " ran" starts exactly where it did before.
        let before = run.origin(7);
        let after = new_run.origin(4);
        assert!((before.0 - after.0).abs() < 1e-3);
        assert!((run.advance - new_run.advance).abs() < 1e-3);
    }

    #[test]
    fn redaction_at_run_end_keeps_advance() {
        let show = text_op("Tj", vec![Object::string_literal("brown fox")]);
        let ops = page_ops(show.clone());
        let run = &scan_text_runs(&ops, &FontTable::default())[0];
        let rewritten = redact_run(run, &show, &[6..9]).unwrap();
        let new_run = &scan_text_runs(&page_ops(rewritten[0].clone()), &FontTable::default())[0];
        assert_eq!(new_run.text(), "brown ");
        assert!((run.advance - new_run.advance).abs() < 1e-3);
    }

    #[test]
    fn zero_font_size_cannot_be_redacted() {
        let show = text_op("Tj", vec![Object::string_literal("abc")]);
        let ops = vec![
            text_op("BT", vec![]),
            text_op("Tf", vec![Object::Name(b"F1".to_vec()), 0.into()]),
            show.clone(),
            text_op("ET", vec![]),
        ];
        let run = &scan_text_runs(&ops, &FontTable::default())[0];
        assert!(redact_run(run, &show, &[0..1]).is_none());
    }

    #[test]
    fn bounds_cover_the_matched_glyphs() {
        let ops = page_ops(text_op("Tj", vec![Object::string_literal("ab")]));
        let run = &scan_text_runs(&ops, &FontTable::default())[0];
        let r = run.bounds(0, 2);
        assert!((r.x0 - 100.0).abs() < 1e-3);
        assert!((r.x1 - 111.12).abs() < 1e-3);
        assert!(r.y0 < 700.0 && r.y1 > 700.0);
    }
}
