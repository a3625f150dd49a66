use crate::models::{AttachmentIn, RawAttachment, SavedFileInfo};
use base64::Engine;
use std::path::PathBuf;

/// Persists an uploaded attachment to a per-endpoint directory and
/// returns a descriptor. Never mutates the original bytes.
/// Failures (base64 decode, filesystem) are treated as "no attachment" by
/// the caller — this function simply returns `None` or an `Err` that the
/// handler downgrades.
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Decode + persist. Returns `(SavedFileInfo, RawAttachment)` so the
    /// handler can hand the decoded bytes onward without re-reading disk
    /// or re-decoding base64 for OCR/redaction.
    pub async fn save(
        &self,
        item: &AttachmentIn,
        public_ip: Option<&str>,
        pc_name: Option<&str>,
        time: &str,
    ) -> anyhow::Result<(SavedFileInfo, RawAttachment)> {
        let ext = item.format.trim().trim_start_matches('.').to_lowercase();
        let bytes = base64::engine::general_purpose::STANDARD.decode(item.data.trim())?;

        let dir = self
            .root
            .join(sanitize(public_ip.filter(|s| !s.is_empty()).unwrap_or("noip")))
            .join(sanitize(pc_name.filter(|s| !s.is_empty()).unwrap_or("noname")));
        tokio::fs::create_dir_all(&dir).await?;

        let file_ext = if ext.is_empty() { "bin".to_string() } else { ext.clone() };
        let path = dir.join(format!("{}.{}", sanitize(time), file_ext));
        tokio::fs::write(&path, &bytes).await?;

        let mime = mime_for_ext(&file_ext);

        Ok((
            SavedFileInfo {
                ext: file_ext.clone(),
                mime,
                path,
            },
            RawAttachment { ext: file_ext, bytes },
        ))
    }
}

/// Replace `:` with `-`, and any other character outside
/// `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ':' => '-',
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' => c,
            _ => '_',
        })
        .collect()
}

fn mime_for_ext(ext: &str) -> String {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_colons_with_dashes() {
        assert_eq!(sanitize("2026-07-28T10:00:00"), "2026-07-28T10-00-00");
    }

    #[test]
    fn sanitize_replaces_unsafe_chars_with_underscore() {
        assert_eq!(sanitize("my pc/name!"), "my_pc_name_");
    }

    #[tokio::test]
    async fn save_writes_file_under_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());
        let item = AttachmentIn {
            format: "png".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(b"hello"),
            size: None,
        };

        let (saved, raw) = store
            .save(&item, Some("1.2.3.4"), Some("laptop-01"), "2026-07-28T10:00:00")
            .await
            .unwrap();

        assert_eq!(raw.bytes, b"hello");
        assert_eq!(saved.ext, "png");
        assert!(saved.path.ends_with("1.2.3.4/laptop-01/2026-07-28T10-00-00.png"));
        assert!(tokio::fs::metadata(&saved.path).await.is_ok());
    }

    #[tokio::test]
    async fn save_falls_back_to_noip_noname() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());
        let item = AttachmentIn {
            format: "txt".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(b"x"),
            size: None,
        };

        let (saved, _) = store.save(&item, None, None, "t").await.unwrap();
        assert!(saved.path.ends_with("noip/noname/t.txt"));
    }

    #[tokio::test]
    async fn save_rejects_bad_base64() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());
        let item = AttachmentIn {
            format: "txt".to_string(),
            data: "not base64!!".to_string(),
            size: None,
        };
        assert!(store.save(&item, None, None, "t").await.is_err());
    }
}
