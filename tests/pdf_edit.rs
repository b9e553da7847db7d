use std::path::{Path, PathBuf};

use docpilot::edit::{apply_edit, Edit};
use docpilot::extract::extract_text;
use docpilot::models::DocumentKind;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tempfile::TempDir;

/// One line of 14pt `F1` text per entry, starting at the top margin.
fn line_ops(lines: &[&str]) -> Vec<Operation> {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 14.into()]),
    ];
    let mut y: i64 = 720;
    for line in lines {
        operations.push(Operation::new(
            "Tm",
            vec![1.into(), 0.into(), 0.into(), 1.into(), 72.into(), y.into()],
        ));
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        y -= 24;
    }
    operations.push(Operation::new("ET", vec![]));
    operations
}

/// Write a PDF with one page per entry. All pages inherit one
/// `/Resources` (Helvetica as `F1`, in `encoding`) from the page tree.
fn write_doc(dir: &Path, pages: Vec<Vec<Operation>>, encoding: &str) -> PathBuf {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => Object::Name(encoding.as_bytes().to_vec()),
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let kids: Vec<Object> = pages
        .into_iter()
        .map(|operations| {
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                Content { operations }.encode().unwrap(),
            ));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            })
            .into()
        })
        .collect();
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let path = dir.join("input.pdf");
    doc.save(&path).unwrap();
    path
}

fn write_pdf(dir: &Path, lines: &[&str]) -> PathBuf {
    write_doc(dir, vec![line_ops(lines)], "WinAnsiEncoding")
}

/// Names registered under `category` in the page's own `/Resources`.
fn page_resource_names(doc: &Document, page_id: ObjectId, category: &[u8]) -> Vec<String> {
    let page = doc.get_dictionary(page_id).unwrap();
    let resources = match page.get(b"Resources").unwrap() {
        Object::Reference(id) => doc.get_dictionary(*id).unwrap(),
        other => other.as_dict().unwrap(),
    };
    let entries = match resources.get(category) {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).unwrap(),
        Ok(other) => other.as_dict().unwrap(),
        Err(_) => return Vec::new(),
    };
    entries
        .iter()
        .map(|(name, _)| String::from_utf8_lossy(name).into_owned())
        .collect()
}

fn extracted(path: &Path) -> String {
    extract_text(&std::fs::read(path).unwrap(), DocumentKind::Pdf).unwrap()
}

fn replace(target: &str, replacement: &str) -> Edit {
    Edit::Replace {
        target: target.to_string(),
        replacement: replacement.to_string(),
    }
}

fn page_operators(path: &Path) -> Vec<String> {
    let doc = Document::load(path).unwrap();
    let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
    let content = doc.get_and_decode_page_content(page_id).unwrap();
    content.operations.into_iter().map(|op| op.operator).collect()
}

#[test]
fn replace_swaps_text_in_place() {
    let tmp = TempDir::new().unwrap();
    let input = write_pdf(tmp.path(), &["The quick brown fox"]);
    let output = tmp.path().join("updated.pdf");

    let report = apply_edit(&input, DocumentKind::Pdf, &replace("fox", "cat"), &output).unwrap();

    assert_eq!(report.match_count, 1);
    assert_eq!(report.matches[0].page, 1);
    // The match sits on the first baseline, right of the left margin.
    assert!(report.matches[0].x0 > 72.0);
    assert!(report.matches[0].y0 <= 720.0 && report.matches[0].y1 > 720.0);

    let text = extracted(&output);
    assert!(!text.contains("fox"), "redacted text still present: {:?}", text);
    assert_eq!(text.matches("cat").count(), 1, "got {:?}", text);
    assert!(text.contains("The quick brown"));
}

#[test]
fn replace_matches_case_variants() {
    let tmp = TempDir::new().unwrap();
    let input = write_pdf(tmp.path(), &["Fox one", "FOX two", "fox three"]);
    let output = tmp.path().join("updated.pdf");

    let report = apply_edit(&input, DocumentKind::Pdf, &replace("fox", "cat"), &output).unwrap();

    assert_eq!(report.match_count, 3);
    let text = extracted(&output).to_lowercase();
    assert!(!text.contains("fox"));
    assert_eq!(text.matches("cat").count(), 3);
}

#[test]
fn no_match_writes_an_unchanged_copy() {
    let tmp = TempDir::new().unwrap();
    let input = write_pdf(tmp.path(), &["The quick brown fox"]);
    let output = tmp.path().join("updated.pdf");

    let report = apply_edit(&input, DocumentKind::Pdf, &replace("dog", "cat"), &output).unwrap();

    assert!(report.is_no_match());
    assert!(report.matches.is_empty());
    assert_eq!(extracted(&output), extracted(&input));
    assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
}

#[test]
fn highlight_marks_every_occurrence_and_keeps_text() {
    let tmp = TempDir::new().unwrap();
    let input = write_pdf(
        tmp.path(),
        &["Revenue grew in March", "revenue fell in April", "nothing here"],
    );
    let output = tmp.path().join("updated.pdf");

    let edit = Edit::Highlight {
        target: "revenue".to_string(),
    };
    let report = apply_edit(&input, DocumentKind::Pdf, &edit, &output).unwrap();

    assert_eq!(report.match_count, 2);
    assert_eq!(extracted(&output), extracted(&input));

    // Flattened: one form XObject per highlight, no annotations left.
    let ops = page_operators(&output);
    assert_eq!(ops.iter().filter(|op| op.as_str() == "Do").count(), 2);
    let doc = Document::load(&output).unwrap();
    let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
    let page = doc.get_dictionary(page_id).unwrap();
    assert!(page.get(b"Annots").is_err());
}

#[test]
fn source_document_is_never_modified() {
    let tmp = TempDir::new().unwrap();
    let input = write_pdf(tmp.path(), &["The quick brown fox"]);
    let before = std::fs::read(&input).unwrap();
    let output = tmp.path().join("updated.pdf");

    apply_edit(&input, DocumentKind::Pdf, &replace("fox", "cat"), &output).unwrap();
    apply_edit(
        &input,
        DocumentKind::Pdf,
        &Edit::Highlight {
            target: "quick".to_string(),
        },
        &output,
    )
    .unwrap();

    assert_eq!(std::fs::read(&input).unwrap(), before);
    // The second edit starts from the source again, so "fox" is back.
    assert!(extracted(&output).contains("fox"));
}

#[test]
fn replace_finds_text_split_across_operators() {
    let tmp = TempDir::new().unwrap();
    let ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 14.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
        Operation::new("Tj", vec![Object::string_literal("The quick brown f")]),
        Operation::new("Tj", vec![Object::string_literal("ox jumps")]),
        Operation::new("ET", vec![]),
    ];
    let input = write_doc(tmp.path(), vec![ops], "WinAnsiEncoding");
    assert!(extracted(&input).contains("fox"));
    let output = tmp.path().join("updated.pdf");

    let report = apply_edit(&input, DocumentKind::Pdf, &replace("fox", "cat"), &output).unwrap();

    assert_eq!(report.match_count, 1);
    let text = extracted(&output);
    assert!(!text.contains("fox"), "redacted text still present: {:?}", text);
    assert!(!text.contains("ox jumps"), "tail of the match survived: {:?}", text);
    assert_eq!(text.matches("cat").count(), 1, "got {:?}", text);
}

#[test]
fn replace_decodes_the_font_encoding() {
    let tmp = TempDir::new().unwrap();
    let ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 14.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
        Operation::new("Tj", vec![Object::string_literal(&b"Le caf\x8e est ouvert"[..])]),
        Operation::new("ET", vec![]),
    ];
    let input = write_doc(tmp.path(), vec![ops], "MacRomanEncoding");
    assert!(extracted(&input).contains("café"));
    let output = tmp.path().join("updated.pdf");

    let report = apply_edit(&input, DocumentKind::Pdf, &replace("café", "bar"), &output).unwrap();

    assert_eq!(report.match_count, 1);
    let text = extracted(&output);
    assert!(!text.contains("café"), "got {:?}", text);
    assert!(text.contains("bar"), "got {:?}", text);
}

#[test]
fn multi_page_edits_keep_page_order_and_resources() {
    let tmp = TempDir::new().unwrap();
    let input = write_doc(
        tmp.path(),
        vec![
            line_ops(&["Page one mentions the fox"]),
            line_ops(&["Page two", "Another fox here"]),
        ],
        "WinAnsiEncoding",
    );
    let text = extracted(&input);
    let (one, two) = (text.find("Page one").unwrap(), text.find("Page two").unwrap());
    assert!(one < two, "pages out of order: {:?}", text);

    let replaced = tmp.path().join("replaced.pdf");
    let report = apply_edit(&input, DocumentKind::Pdf, &replace("fox", "cat"), &replaced).unwrap();
    assert_eq!(report.match_count, 2);
    let pages: Vec<u32> = report.matches.iter().map(|m| m.page).collect();
    assert_eq!(pages, vec![1, 2]);
    let text = extracted(&replaced);
    assert!(!text.contains("fox"));
    assert!(text.find("Page one").unwrap() < text.find("Page two").unwrap());

    let highlighted = tmp.path().join("highlighted.pdf");
    let edit = Edit::Highlight {
        target: "page".to_string(),
    };
    let report = apply_edit(&input, DocumentKind::Pdf, &edit, &highlighted).unwrap();
    assert_eq!(report.match_count, 2);

    // Each page gets its own copy of the shared resources; nothing
    // registered for one page shows up on the other.
    let doc = Document::load(&replaced).unwrap();
    let ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    assert_eq!(page_resource_names(&doc, ids[0], b"Font"), vec!["F1", "DPHelv0"]);
    assert_eq!(page_resource_names(&doc, ids[1], b"Font"), vec!["F1", "DPHelv0"]);

    let doc = Document::load(&highlighted).unwrap();
    let ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    assert_eq!(page_resource_names(&doc, ids[0], b"XObject"), vec!["DPAnnot0"]);
    assert_eq!(page_resource_names(&doc, ids[1], b"XObject"), vec!["DPAnnot0"]);
}
