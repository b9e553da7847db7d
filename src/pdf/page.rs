//! Page-level plumbing: resources, annotation arrays, and content streams.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use super::fonts::{page_resources, resolve};

/// Register `object_id` under a fresh name in the page's `category`
/// resources (`/Font`, `/XObject`, ...) and return that name.
///
/// Inherited or shared resource dictionaries are copied onto the page
/// first, so other pages never see the new entry.
pub fn add_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &[u8],
    prefix: &str,
    object_id: ObjectId,
) -> lopdf::Result<Vec<u8>> {
    let mut resources = page_resources(doc, page_id).unwrap_or_else(Dictionary::new);
    let mut entries = resolve(doc, resources.get(category).ok())
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new);

    let mut n = 0;
    let name = loop {
        let candidate = format!("{}{}", prefix, n).into_bytes();
        if !entries.has(&candidate) {
            break candidate;
        }
        n += 1;
    };

    entries.set(name.clone(), Object::Reference(object_id));
    resources.set(category.to_vec(), Object::Dictionary(entries));
    doc.get_dictionary_mut(page_id)?
        .set("Resources", Object::Dictionary(resources));
    Ok(name)
}

/// The page's `/Annots` entries, resolved to an owned array.
pub fn page_annotations(doc: &Document, page_id: ObjectId) -> lopdf::Result<Vec<Object>> {
    let page = doc.get_dictionary(page_id)?;
    let annots = resolve(doc, page.get(b"Annots").ok())
        .and_then(|o| o.as_array().ok())
        .cloned()
        .unwrap_or_default();
    Ok(annots)
}

pub fn set_page_annotations(
    doc: &mut Document,
    page_id: ObjectId,
    annots: Vec<Object>,
) -> lopdf::Result<()> {
    let page = doc.get_dictionary_mut(page_id)?;
    if annots.is_empty() {
        page.remove(b"Annots");
    } else {
        page.set("Annots", Object::Array(annots));
    }
    Ok(())
}

/// Point the page at `base` content streams wrapped in `q ... Q`, followed
/// by `overlay` drawn in the page's default coordinate system.
pub fn set_contents_with_overlay(
    doc: &mut Document,
    page_id: ObjectId,
    base: Vec<ObjectId>,
    overlay: Vec<Operation>,
) -> lopdf::Result<()> {
    let open = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let mut operations = vec![Operation::new("Q", vec![])];
    operations.extend(overlay);
    // Leading newline: the previous stream may not end in whitespace.
    let mut bytes = b"\n".to_vec();
    bytes.extend(Content { operations }.encode()?);
    let close = doc.add_object(Stream::new(Dictionary::new(), bytes));

    let mut streams = Vec::with_capacity(base.len() + 2);
    streams.push(Object::Reference(open));
    streams.extend(base.into_iter().map(Object::Reference));
    streams.push(Object::Reference(close));
    doc.get_dictionary_mut(page_id)?
        .set("Contents", Object::Array(streams));
    Ok(())
}
