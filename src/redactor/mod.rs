use crate::models::RawAttachment;
use crate::ocr::OcrEngine;
use std::path::{Path, PathBuf};

pub mod image;
pub mod office;
pub mod pdf;

mod boxes;

const OFFICE_EXTS: &[&str] = &["docx", "pptx", "xlsx"];
const PLAIN_EXTS: &[&str] = &["txt", "csv"];
const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Outcome of running the Document Redactor over one attachment. `bytes`
/// is always populated — with the original bytes when no redaction fired.
/// `changed` is resolved as byte-content comparison against the input,
/// independent of whether `sibling_path` differs from the original path.
pub struct RedactionOutcome {
    pub bytes: Vec<u8>,
    pub changed: bool,
    pub sibling_path: Option<PathBuf>,
}

impl RedactionOutcome {
    pub(crate) fn unchanged(bytes: Vec<u8>) -> Self {
        Self { bytes, changed: false, sibling_path: None }
    }
}

/// Dispatch by extension to the format-aware redaction pipeline.
/// `original_path` anchors the sibling output filename (`*.detection.*`
/// for text formats, `*.redacted.*` for raster/PDF). Formats with no
/// redactor, and any internal detector failure, pass the original bytes
/// through unchanged — detector failures are never surfaced to the
/// client.
pub async fn redact(original_path: &Path, raw: &RawAttachment, ocr: &dyn OcrEngine) -> RedactionOutcome {
    let ext = raw.ext.as_str();

    let result = if OFFICE_EXTS.contains(&ext) {
        office::redact_office(original_path, raw)
    } else if PLAIN_EXTS.contains(&ext) {
        office::redact_plain(original_path, raw)
    } else if IMAGE_EXTS.contains(&ext) {
        image::redact_image(original_path, raw, ocr).await
    } else if ext == "pdf" {
        pdf::redact_pdf(original_path, raw, ocr).await
    } else {
        Ok(RedactionOutcome::unchanged(raw.bytes.clone()))
    };

    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!("document redaction failed for .{ext}, passing attachment through unchanged: {e}");
            RedactionOutcome::unchanged(raw.bytes.clone())
        }
    }
}

/// Sibling output path next to the saved original: `name.<tag>.ext`.
pub(crate) fn sibling_path(original: &Path, tag: &str) -> PathBuf {
    let stem = original.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = original.extension().and_then(|s| s.to_str()).unwrap_or("bin");
    original.with_file_name(format!("{stem}.{tag}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_path_inserts_tag_before_extension() {
        let p = Path::new("/tmp/downloads/1.2.3.4/laptop/2026-07-28T10-00-00.docx");
        let sibling = sibling_path(p, "detection");
        assert_eq!(sibling.file_name().unwrap().to_str().unwrap(), "2026-07-28T10-00-00.detection.docx");
    }

    #[tokio::test]
    async fn unsupported_extension_passes_through_unchanged() {
        use crate::ocr::NullOcrEngine;
        let raw = RawAttachment { ext: "zip".to_string(), bytes: vec![1, 2, 3] };
        let outcome = redact(Path::new("/tmp/x.zip"), &raw, &NullOcrEngine).await;
        assert!(!outcome.changed);
        assert_eq!(outcome.bytes, raw.bytes);
    }
}
