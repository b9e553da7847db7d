//! Fonts as seen from a content stream: how wide each glyph is and what
//! text it stands for.
//!
//! | Font | Codes | Text |
//! |------|-------|------|
//! | Simple (Type1, TrueType, Type3) | one byte | `/ToUnicode`, else `/Encoding` (name or `/BaseEncoding` + `/Differences`) |
//! | Composite (Type0) | two bytes | `/ToUnicode` |
//!
//! Decoding goes through lopdf's `Dictionary::get_font_encoding` and
//! `Document::decode_text`; single-byte fonts are decoded once into a
//! 256-entry table. Glyphs whose text cannot be recovered decode to an
//! empty string and are never matched.

use std::collections::HashMap;

use lopdf::{dictionary, Dictionary, Document, Encoding, Object, ObjectId};
use tracing::debug;

/// Helvetica advance widths (1/1000 em) for codes 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 32-47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 48-63
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 64-79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 80-95
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 96-111
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 112-126
];

const DEFAULT_WIDTH: f32 = 556.0;

/// Default CID width when a Type0 descendant has no `/DW`.
const DEFAULT_CID_WIDTH: f32 = 1000.0;

/// Encode text for the WinAnsi-encoded Helvetica used by overlays.
/// Characters outside the encoding become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    let font = win_ansi_font();
    let Ok(encoding) = font.get_font_encoding(&Document::new()) else {
        return text.bytes().map(|b| if b.is_ascii() { b } else { b'?' }).collect();
    };
    let mut bytes = Vec::with_capacity(text.len());
    let mut buf = [0u8; 4];
    for c in text.chars() {
        match Document::encode_text(&encoding, c.encode_utf8(&mut buf)).as_slice() {
            [b] => bytes.push(*b),
            _ => bytes.push(b'?'),
        }
    }
    bytes
}

/// The Helvetica font dictionary drawn by overlays.
pub fn win_ansi_font() -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    }
}

enum Decoder {
    /// Text for each single-byte code.
    Table(Vec<String>),
    /// Multi-byte codes looked up in a `/ToUnicode` CMap.
    Cmap(Encoding<'static>),
    Opaque,
}

/// Metrics and decoding for one font resource.
pub struct FontInfo {
    first_char: i64,
    widths: Vec<f32>,
    missing_width: f32,
    monospace: bool,
    /// `(first, last, width)` from a composite font's `/W` array.
    cid_widths: Vec<(u32, u32, f32)>,
    default_cid_width: f32,
    code_len: usize,
    decoder: Decoder,
}

impl std::fmt::Debug for FontInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontInfo")
            .field("code_len", &self.code_len)
            .field("widths", &self.widths.len())
            .field("cid_widths", &self.cid_widths.len())
            .finish()
    }
}

impl FontInfo {
    /// Used when a font resource cannot be resolved: Helvetica widths and
    /// Latin-1 text.
    pub fn fallback() -> Self {
        Self {
            first_char: 0,
            widths: Vec::new(),
            missing_width: 0.0,
            monospace: false,
            cid_widths: Vec::new(),
            default_cid_width: DEFAULT_CID_WIDTH,
            code_len: 1,
            decoder: Decoder::Table((0..=255u8).map(|b| (b as char).to_string()).collect()),
        }
    }

    fn from_dict(doc: &Document, font: &Dictionary) -> Self {
        if name_of(font.get(b"Subtype").ok()).as_deref() == Some("Type0") {
            return Self::composite(doc, font);
        }

        let base_font = name_of(font.get(b"BaseFont").ok()).unwrap_or_default();
        let first_char = resolve(doc, font.get(b"FirstChar").ok())
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0);
        let widths = resolve(doc, font.get(b"Widths").ok())
            .and_then(|o| o.as_array().ok())
            .map(|arr| {
                arr.iter()
                    .map(|w| number(resolve(doc, Some(w))).unwrap_or(0.0))
                    .collect()
            })
            .unwrap_or_default();
        let missing_width = resolve(doc, font.get(b"FontDescriptor").ok())
            .and_then(|o| o.as_dict().ok())
            .and_then(|d| number(resolve(doc, d.get(b"MissingWidth").ok())))
            .unwrap_or(0.0);

        Self {
            first_char,
            widths,
            missing_width,
            monospace: base_font.starts_with("Courier"),
            cid_widths: Vec::new(),
            default_cid_width: DEFAULT_CID_WIDTH,
            code_len: 1,
            decoder: Decoder::Table(simple_table(doc, font)),
        }
    }

    fn composite(doc: &Document, font: &Dictionary) -> Self {
        let descendant = resolve(doc, font.get(b"DescendantFonts").ok())
            .and_then(|o| o.as_array().ok())
            .and_then(|arr| resolve(doc, arr.first()))
            .and_then(|o| o.as_dict().ok());
        let default_cid_width = descendant
            .and_then(|d| number(resolve(doc, d.get(b"DW").ok())))
            .unwrap_or(DEFAULT_CID_WIDTH);
        let cid_widths = descendant
            .and_then(|d| resolve(doc, d.get(b"W").ok()))
            .and_then(|o| o.as_array().ok())
            .map(|w| parse_cid_widths(doc, w))
            .unwrap_or_default();
        let decoder = match to_unicode(doc, font) {
            Some(cmap) => Decoder::Cmap(cmap),
            None => {
                debug!("composite font without /ToUnicode; its text is not searchable");
                Decoder::Opaque
            }
        };

        Self {
            first_char: 0,
            widths: Vec::new(),
            missing_width: 0.0,
            monospace: false,
            cid_widths,
            default_cid_width,
            code_len: 2,
            decoder,
        }
    }

    /// Bytes per character code: 1 for simple fonts, 2 for composite ones.
    pub fn code_len(&self) -> usize {
        self.code_len
    }

    /// Text drawn by glyph `code`; empty when unknown.
    pub fn text(&self, code: u32) -> String {
        match &self.decoder {
            Decoder::Table(table) => table.get(code as usize).cloned().unwrap_or_default(),
            Decoder::Cmap(encoding) => {
                let bytes = code_bytes(code, self.code_len);
                Document::decode_text(encoding, &bytes)
                    .map(|s| s.replace('\u{fffd}', ""))
                    .unwrap_or_default()
            }
            Decoder::Opaque => String::new(),
        }
    }

    /// Advance width of `code` in 1/1000 em.
    pub fn width(&self, code: u32) -> f32 {
        if self.code_len > 1 {
            return self
                .cid_widths
                .iter()
                .find(|(first, last, _)| (*first..=*last).contains(&code))
                .map(|(_, _, w)| *w)
                .unwrap_or(self.default_cid_width);
        }
        let idx = code as i64 - self.first_char;
        if !self.widths.is_empty() {
            if idx >= 0 && (idx as usize) < self.widths.len() {
                return self.widths[idx as usize];
            }
            if self.missing_width > 0.0 {
                return self.missing_width;
            }
        }
        if self.monospace {
            return 600.0;
        }
        match code {
            32..=126 => HELVETICA_WIDTHS[(code - 32) as usize] as f32,
            _ => DEFAULT_WIDTH,
        }
    }
}

/// Big-endian bytes of `code`, `len` bytes long.
pub fn code_bytes(code: u32, len: usize) -> Vec<u8> {
    let be = code.to_be_bytes();
    be[4 - len.clamp(1, 4)..].to_vec()
}

/// Decode every single-byte code of a simple font.
fn simple_table(doc: &Document, font: &Dictionary) -> Vec<String> {
    let encoding = resolve(doc, font.get(b"Encoding").ok());
    let (base, differences) = match encoding {
        Some(Object::Name(name)) => (name.clone(), None),
        Some(Object::Dictionary(dict)) => (
            name_of(dict.get(b"BaseEncoding").ok())
                .map(String::into_bytes)
                .unwrap_or_else(|| b"StandardEncoding".to_vec()),
            resolve(doc, dict.get(b"Differences").ok()).and_then(|o| o.as_array().ok()),
        ),
        _ => (b"StandardEncoding".to_vec(), None),
    };

    let shim = dictionary! {
        "Type" => "Font",
        "Encoding" => Object::Name(base),
    };
    let mut table: Vec<String> = match shim.get_font_encoding(doc) {
        Ok(encoding) => (0..=255u8)
            .map(|b| Document::decode_text(&encoding, &[b]).unwrap_or_default())
            .collect(),
        Err(_) => vec![String::new(); 256],
    };

    if let Some(differences) = differences {
        apply_differences(&mut table, differences);
    }

    if let Some(cmap) = to_unicode(doc, font) {
        for (code, slot) in table.iter_mut().enumerate() {
            if let Ok(text) = Document::decode_text(&cmap, &[code as u8]) {
                if !text.is_empty() && !text.contains('\u{fffd}') {
                    *slot = text;
                }
            }
        }
    }
    table
}

/// Overlay `/Differences` entries whose glyph names carry their text.
fn apply_differences(table: &mut [String], differences: &[Object]) {
    let mut code: usize = 0;
    for entry in differences {
        match entry {
            Object::Integer(start) => code = (*start).clamp(0, 255) as usize,
            Object::Name(name) => {
                if let (Some(slot), Some(text)) = (table.get_mut(code), glyph_name_text(name)) {
                    *slot = text;
                }
                code += 1;
            }
            _ => {}
        }
    }
}

/// Text for glyph names that spell it out: `uniXXXX`, `uXXXX` and
/// single-character names. Other names keep the base encoding's text.
fn glyph_name_text(name: &[u8]) -> Option<String> {
    let name = std::str::from_utf8(name).ok()?;
    let hex = name.strip_prefix("uni").or_else(|| name.strip_prefix('u'));
    if let Some(hex) = hex.filter(|h| h.len() >= 4 && h.chars().all(|c| c.is_ascii_hexdigit())) {
        let units: Vec<u16> = hex
            .as_bytes()
            .chunks(4)
            .filter_map(|c| u16::from_str_radix(std::str::from_utf8(c).ok()?, 16).ok())
            .collect();
        return String::from_utf16(&units).ok();
    }
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c.to_string()),
        _ => None,
    }
}

/// The font's `/ToUnicode` CMap, parsed by lopdf.
fn to_unicode(doc: &Document, font: &Dictionary) -> Option<Encoding<'static>> {
    let cmap = font.get(b"ToUnicode").ok()?.clone();
    // Identity-H makes lopdf take the encoding from /ToUnicode.
    let shim = dictionary! {
        "Type" => "Font",
        "Encoding" => "Identity-H",
        "ToUnicode" => cmap,
    };
    let encoding = shim.get_font_encoding(doc);
    match encoding {
        Ok(Encoding::UnicodeMapEncoding(map)) => Some(Encoding::UnicodeMapEncoding(map)),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "unreadable /ToUnicode CMap");
            None
        }
    }
}

fn parse_cid_widths(doc: &Document, w: &[Object]) -> Vec<(u32, u32, f32)> {
    let int = |o: Option<&Object>| number(resolve(doc, o)).map(|n| n.max(0.0) as u32);
    let mut out = Vec::new();
    let mut i = 0;
    while i < w.len() {
        let Some(first) = int(w.get(i)) else { break };
        match resolve(doc, w.get(i + 1)) {
            Some(Object::Array(list)) => {
                for (k, width) in list.iter().enumerate() {
                    if let Some(width) = number(resolve(doc, Some(width))) {
                        let code = first + k as u32;
                        out.push((code, code, width));
                    }
                }
                i += 2;
            }
            Some(_) => {
                let (Some(last), Some(width)) = (int(w.get(i + 1)), number(resolve(doc, w.get(i + 2))))
                else {
                    break;
                };
                out.push((first, last, width));
                i += 3;
            }
            None => break,
        }
    }
    out
}

/// Every font resource visible on a page, keyed by resource name.
#[derive(Debug, Default)]
pub struct FontTable {
    fonts: HashMap<Vec<u8>, FontInfo>,
}

impl FontTable {
    pub fn for_page(doc: &Document, page_id: ObjectId) -> Self {
        let mut fonts = HashMap::new();
        let font_dict = page_resources(doc, page_id)
            .and_then(|res| resolve(doc, res.get(b"Font").ok()).cloned())
            .and_then(|o| o.as_dict().ok().cloned());
        if let Some(font_dict) = font_dict {
            for (name, value) in font_dict.iter() {
                if let Some(dict) = resolve(doc, Some(value)).and_then(|o| o.as_dict().ok()) {
                    fonts.insert(name.clone(), FontInfo::from_dict(doc, dict));
                }
            }
        }
        Self { fonts }
    }

    pub fn get(&self, name: &[u8]) -> Option<&FontInfo> {
        self.fonts.get(name)
    }
}

/// The page's effective `/Resources`, following `/Parent` inheritance.
pub fn page_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    loop {
        if let Some(res) = resolve(doc, node.get(b"Resources").ok()).and_then(|o| o.as_dict().ok())
        {
            return Some(res.clone());
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
}

/// Follow a reference (one level is enough for well-formed files).
pub fn resolve<'a>(doc: &'a Document, obj: Option<&'a Object>) -> Option<&'a Object> {
    match obj? {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub fn number(obj: Option<&Object>) -> Option<f32> {
    match obj? {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn name_of(obj: Option<&Object>) -> Option<String> {
    match obj? {
        Object::Name(n) => Some(String::from_utf8_lossy(n).into_owned()),
        _ => None,
    }
}
