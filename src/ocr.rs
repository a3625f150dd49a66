use crate::models::RawAttachment;
use async_trait::async_trait;

/// A single OCR-recognized word and its pixel bounding box, as produced by
/// Tesseract's `image_to_data` mode. Used by the Document
/// Redactor's image and PDF-rasterization pipelines to build per-word
/// redaction rectangles.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Pluggable OCR backend. The real engine (Tesseract, a cloud API, ...) is
/// an opaque collaborator — this trait lets the rest
/// of the pipeline stay fully implemented and testable against a stub.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Extract UTF-8 text from image bytes. Implementations should not
    /// panic; any internal failure should surface as `Err` so the caller
    /// can fall back gracefully.
    async fn extract_text(&self, bytes: &[u8], ext: &str) -> anyhow::Result<String>;

    /// Word-level OCR with pixel bounding boxes. Default
    /// implementation returns no words, which leaves the Document
    /// Redactor's image pipeline a no-op rather than failing — engines
    /// that only support plain-text extraction still function for the
    /// rest of the pipeline.
    async fn extract_words(&self, _bytes: &[u8], _ext: &str) -> anyhow::Result<Vec<OcrWord>> {
        Ok(Vec::new())
    }
}

/// No-backend stub: OCR is reported as unused rather than failing the
/// request, matching how the pipeline behaves when pytesseract is
/// unavailable.
pub struct NullOcrEngine;

#[async_trait]
impl OcrEngine for NullOcrEngine {
    async fn extract_text(&self, _bytes: &[u8], _ext: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];

/// Run OCR over an attachment, if any. Contract: returns
/// `("", false, "<reason>")` when OCR is disabled or the attachment is
/// absent or not an image; never blocks the pipeline on failure.
pub async fn run_ocr(
    engine: &dyn OcrEngine,
    attachment: Option<&RawAttachment>,
    enabled: bool,
) -> (String, bool, &'static str) {
    if !enabled {
        return (String::new(), false, "ocr_disabled");
    }

    let Some(att) = attachment else {
        return (String::new(), false, "no_attachment");
    };

    if !IMAGE_EXTS.contains(&att.ext.as_str()) {
        return (String::new(), false, "not_image");
    }

    match engine.extract_text(&att.bytes, &att.ext).await {
        Ok(text) if !text.is_empty() => (text, true, "ok"),
        Ok(_) => (String::new(), true, "empty_result"),
        Err(_) => (String::new(), false, "ocr_error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_returns_empty_without_calling_engine() {
        let engine = NullOcrEngine;
        let att = RawAttachment { ext: "png".to_string(), bytes: vec![1, 2, 3] };
        let (text, used, reason) = run_ocr(&engine, Some(&att), false).await;
        assert_eq!(text, "");
        assert!(!used);
        assert_eq!(reason, "ocr_disabled");
    }

    #[tokio::test]
    async fn no_attachment_returns_empty() {
        let engine = NullOcrEngine;
        let (text, used, reason) = run_ocr(&engine, None, true).await;
        assert_eq!(text, "");
        assert!(!used);
        assert_eq!(reason, "no_attachment");
    }

    #[tokio::test]
    async fn non_image_attachment_is_skipped() {
        let engine = NullOcrEngine;
        let att = RawAttachment { ext: "txt".to_string(), bytes: vec![1] };
        let (text, used, reason) = run_ocr(&engine, Some(&att), true).await;
        assert_eq!(text, "");
        assert!(!used);
        assert_eq!(reason, "not_image");
    }

    struct StubEngine(&'static str);

    #[async_trait]
    impl OcrEngine for StubEngine {
        async fn extract_text(&self, _bytes: &[u8], _ext: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn image_attachment_runs_engine() {
        let engine = StubEngine("hello");
        let att = RawAttachment { ext: "png".to_string(), bytes: vec![1, 2, 3] };
        let (text, used, reason) = run_ocr(&engine, Some(&att), true).await;
        assert_eq!(text, "hello");
        assert!(used);
        assert_eq!(reason, "ok");
    }

    struct FailingEngine;

    #[async_trait]
    impl OcrEngine for FailingEngine {
        async fn extract_text(&self, _bytes: &[u8], _ext: &str) -> anyhow::Result<String> {
            anyhow::bail!("engine exploded")
        }
    }

    #[tokio::test]
    async fn engine_failure_is_swallowed() {
        let engine = FailingEngine;
        let att = RawAttachment { ext: "jpg".to_string(), bytes: vec![1] };
        let (text, used, reason) = run_ocr(&engine, Some(&att), true).await;
        assert_eq!(text, "");
        assert!(!used);
        assert_eq!(reason, "ocr_error");
    }

    #[tokio::test]
    async fn default_extract_words_is_empty_for_text_only_engines() {
        let engine = StubEngine("hello");
        let words = engine.extract_words(&[1, 2, 3], "png").await.unwrap();
        assert!(words.is_empty());
    }
}
