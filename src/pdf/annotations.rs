//! Highlight annotations and annotation flattening.
//!
//! A highlight is written as a standard `/Highlight` annotation with its own
//! appearance stream: a yellow fill at 30% opacity over a solid yellow
//! border, blended with `Multiply` so the text underneath stays legible.
//!
//! Flattening draws each annotation's normal appearance into the page
//! content and removes the annotation, so the highlight is part of the page
//! and survives viewers that ignore or strip annotations.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use super::content::{Matrix, Rect};
use super::fonts::{number, resolve};
use super::page::{add_page_resource, page_annotations, set_contents_with_overlay, set_page_annotations};

const FILL_OPACITY: f32 = 0.3;
const BORDER_WIDTH: f32 = 0.5;

/// Annotation flag bits that keep an annotation from being drawn.
const FLAG_HIDDEN: i64 = 1 << 1;
const FLAG_NO_VIEW: i64 = 1 << 5;

fn real_array(values: &[f32]) -> Object {
    Object::Array(values.iter().map(|&v| Object::Real(v)).collect())
}

/// Add a yellow highlight over `rect` to the page and return the
/// annotation's object id.
pub fn add_highlight(doc: &mut Document, page_id: ObjectId, rect: Rect) -> lopdf::Result<ObjectId> {
    let gs_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => Object::Real(FILL_OPACITY),
        "CA" => Object::Real(1.0),
        "BM" => "Multiply",
    });

    let appearance = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new("gs", vec![Object::Name(b"GS0".to_vec())]),
            Operation::new("rg", vec![Object::Real(1.0), Object::Real(1.0), Object::Real(0.0)]),
            Operation::new("RG", vec![Object::Real(1.0), Object::Real(1.0), Object::Real(0.0)]),
            Operation::new("w", vec![Object::Real(BORDER_WIDTH)]),
            Operation::new(
                "re",
                vec![
                    Object::Real(rect.x0),
                    Object::Real(rect.y0),
                    Object::Real(rect.width()),
                    Object::Real(rect.height()),
                ],
            ),
            Operation::new("B", vec![]),
            Operation::new("Q", vec![]),
        ],
    };
    let form_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => real_array(&[rect.x0, rect.y0, rect.x1, rect.y1]),
            "Resources" => dictionary! {
                "ExtGState" => dictionary! { "GS0" => gs_id },
            },
        },
        appearance.encode()?,
    ));

    let annot_id = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Highlight",
        "Rect" => real_array(&[rect.x0, rect.y0, rect.x1, rect.y1]),
        "QuadPoints" => real_array(&[
            rect.x0, rect.y1, rect.x1, rect.y1, rect.x0, rect.y0, rect.x1, rect.y0,
        ]),
        "C" => real_array(&[1.0, 1.0, 0.0]),
        "F" => Object::Integer(4),
        "P" => page_id,
        "AP" => dictionary! { "N" => form_id },
    });

    let mut annots = page_annotations(doc, page_id)?;
    annots.push(Object::Reference(annot_id));
    set_page_annotations(doc, page_id, annots)?;
    Ok(annot_id)
}

/// The normal appearance stream and rectangle of a visible annotation.
fn appearance_of(doc: &Document, entry: &Object) -> Option<(ObjectId, Rect)> {
    let annot = resolve(doc, Some(entry))?.as_dict().ok()?;
    let flags = resolve(doc, annot.get(b"F").ok())
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(0);
    if flags & (FLAG_HIDDEN | FLAG_NO_VIEW) != 0 {
        return None;
    }

    let normal = resolve(doc, annot.get(b"AP").ok())?
        .as_dict()
        .ok()?
        .get(b"N")
        .ok()?;
    let form_id = match normal {
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Stream(_) => *id,
            // A dictionary of appearance states, selected by /AS.
            Object::Dictionary(states) => {
                let state = annot.get(b"AS").ok()?.as_name().ok()?;
                states.get(state).ok()?.as_reference().ok()?
            }
            _ => return None,
        },
        Object::Dictionary(states) => {
            let state = annot.get(b"AS").ok()?.as_name().ok()?;
            states.get(state).ok()?.as_reference().ok()?
        }
        _ => return None,
    };

    let rect = rect_of(doc, annot.get(b"Rect").ok())?;
    Some((form_id, rect))
}

fn rect_of(doc: &Document, obj: Option<&Object>) -> Option<Rect> {
    let values: Vec<f32> = resolve(doc, obj)?
        .as_array()
        .ok()?
        .iter()
        .map(|v| number(resolve(doc, Some(v))))
        .collect::<Option<_>>()?;
    if values.len() != 4 {
        return None;
    }
    Some(Rect {
        x0: values[0].min(values[2]),
        y0: values[1].min(values[3]),
        x1: values[0].max(values[2]),
        y1: values[1].max(values[3]),
    })
}

/// Matrix that maps the form's transformed bounding box onto `rect`.
fn placement(doc: &Document, form_id: ObjectId, rect: Rect) -> Option<Matrix> {
    let form = doc.get_object(form_id).ok()?.as_stream().ok()?;
    let bbox = rect_of(doc, form.dict.get(b"BBox").ok())?;
    let form_matrix = resolve(doc, form.dict.get(b"Matrix").ok())
        .and_then(|o| o.as_array().ok())
        .and_then(|arr| {
            let v: Vec<f32> = arr.iter().map(|o| number(Some(o))).collect::<Option<_>>()?;
            (v.len() == 6).then(|| Matrix {
                a: v[0],
                b: v[1],
                c: v[2],
                d: v[3],
                e: v[4],
                f: v[5],
            })
        })
        .unwrap_or(Matrix::IDENTITY);

    let corners = [
        form_matrix.apply(bbox.x0, bbox.y0),
        form_matrix.apply(bbox.x1, bbox.y0),
        form_matrix.apply(bbox.x0, bbox.y1),
        form_matrix.apply(bbox.x1, bbox.y1),
    ];
    let x0 = corners.iter().map(|c| c.0).fold(f32::MAX, f32::min);
    let y0 = corners.iter().map(|c| c.1).fold(f32::MAX, f32::min);
    let x1 = corners.iter().map(|c| c.0).fold(f32::MIN, f32::max);
    let y1 = corners.iter().map(|c| c.1).fold(f32::MIN, f32::max);
    let (w, h) = (x1 - x0, y1 - y0);
    if w.abs() < f32::EPSILON || h.abs() < f32::EPSILON {
        return None;
    }

    let sx = rect.width() / w;
    let sy = rect.height() / h;
    Some(Matrix {
        a: sx,
        b: 0.0,
        c: 0.0,
        d: sy,
        e: rect.x0 - x0 * sx,
        f: rect.y0 - y0 * sy,
    })
}

/// Draw every visible annotation with an appearance stream into the page
/// content and drop it from `/Annots`. Returns how many were flattened.
///
/// Annotations without a usable appearance are left in place.
pub fn flatten_page(doc: &mut Document, page_id: ObjectId) -> lopdf::Result<usize> {
    let annots = page_annotations(doc, page_id)?;
    if annots.is_empty() {
        return Ok(0);
    }

    let mut keep = Vec::new();
    let mut overlay = Vec::new();
    for entry in annots {
        let Some((form_id, rect)) = appearance_of(doc, &entry) else {
            keep.push(entry);
            continue;
        };
        let Some(m) = placement(doc, form_id, rect) else {
            keep.push(entry);
            continue;
        };
        let name = add_page_resource(doc, page_id, b"XObject", "DPAnnot", form_id)?;
        overlay.push(Operation::new("q", vec![]));
        overlay.push(Operation::new(
            "cm",
            [m.a, m.b, m.c, m.d, m.e, m.f]
                .iter()
                .map(|&v| Object::Real(v))
                .collect(),
        ));
        overlay.push(Operation::new("Do", vec![Object::Name(name)]));
        overlay.push(Operation::new("Q", vec![]));
    }

    let flattened = overlay.len() / 4;
    if flattened == 0 {
        return Ok(0);
    }
    set_page_annotations(doc, page_id, keep)?;
    let base = doc.get_page_contents(page_id);
    set_contents_with_overlay(doc, page_id, base, overlay)?;
    debug!(?page_id, flattened, "flattened annotations");
    Ok(flattened)
}
