use crate::attachment_store::AttachmentStore;
use crate::config::Config;
use crate::entities::Label;
use crate::error::AppError;
use crate::image_similarity;
use crate::llm_detector::{HttpLlmBackend, LlmDetectorRuntime};
use crate::log_repo::LogRepository;
use crate::masker;
use crate::models::{
    AttachmentOut, Entity, InspectRequest, InspectResponse, LogRecord, Provenance, RawAttachment, TaggedEntity,
};
use crate::number_normalizer;
use crate::ocr::{NullOcrEngine, OcrEngine};
use crate::policy::{self, PolicyInput, PromptSource};
use crate::redactor;
use crate::regex_detector;
use crate::settings_store::SettingsStore;
use crate::span_merger::{self, LlmRawEntity};
use base64::Engine;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Shared state for the ingestion handler. `llm` is absent
/// whenever `Config::llm_enabled()` is false at startup — the pipeline
/// degrades to regex-only detection rather than failing to boot.
pub struct AppState {
    pub attachment_store: AttachmentStore,
    pub settings: Arc<SettingsStore>,
    pub log_repo: LogRepository,
    pub ocr: Arc<dyn OcrEngine>,
    pub llm: Option<Arc<LlmDetectorRuntime>>,
    pub similarity_blocklist_dir: PathBuf,
}

impl AppState {
    /// Wire up the shared state from process configuration: connect/migrate
    /// the SQLite pool, read the initial policy snapshot, and load the LLM
    /// Detector Runtime only when `Config::llm_enabled`.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        if let Some(path) = config.database_url.strip_prefix("sqlite://") {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.ok();
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await?;

        let log_repo = LogRepository::new(pool.clone());
        log_repo.migrate().await?;

        let settings = Arc::new(SettingsStore::new(pool.clone()));
        settings.migrate().await?;
        if let Err(e) = settings.refresh().await {
            tracing::warn!("policy snapshot refresh failed, defaulting to monitored/mask: {e}");
        }

        let llm = if config.llm_enabled() {
            let backend = Box::new(HttpLlmBackend::new(config.llm_endpoint.clone()));
            Some(Arc::new(LlmDetectorRuntime::new(backend, config.llm_timeout_secs, config.max_new_tokens)))
        } else {
            tracing::info!("LLM detection disabled (no MODEL_DIR or USE_AI_DETECTOR=false); regex-only pipeline");
            None
        };

        Ok(AppState {
            attachment_store: AttachmentStore::new(config.downloads_root.clone()),
            settings,
            log_repo,
            ocr: Arc::new(NullOcrEngine),
            llm,
            similarity_blocklist_dir: PathBuf::from(&config.similarity_blocklist_dir),
        })
    }
}

const MIN_OCR_STRIP_LEN_FOR_SIMILARITY: usize = 3;

/// Run the full inspection pipeline for one request. Persistence
/// failures propagate as `AppError::Db` so the caller maps them to a
/// `500` with no LogRecord.
pub async fn inspect(state: &AppState, req: InspectRequest) -> Result<InspectResponse, AppError> {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    let saved = match &req.attachment {
        Some(item) => state
            .attachment_store
            .save(item, req.public_ip.as_deref(), req.pc_name.as_deref(), &req.time)
            .await
            .ok(),
        None => None,
    };

    let snapshot = state.settings.current();
    let monitored = policy::is_monitored(&snapshot, &req.interface, req.host.as_deref());

    let mut llm_processing_ms = 0u64;
    let mut regex_in_ocr = false;
    let mut is_image_attachment = false;
    let mut ocr_ran = false;
    let mut ocr_text_len_after_strip = 0usize;
    let mut similarity_score = None;
    let mut tagged: Vec<TaggedEntity> = Vec::new();
    let mut llm_reported_sensitive = false;

    if monitored {
        let raw_prompt_entities = detect_with_normalizer_recovery(&req.prompt);

        let attachment_ref = saved.as_ref().map(|(_, r)| r);
        let (ocr_text, ran, _reason) = crate::ocr::run_ocr(state.ocr.as_ref(), attachment_ref, true).await;
        ocr_ran = ran;
        let ocr_entities = detect_with_normalizer_recovery(&ocr_text);
        regex_in_ocr = !ocr_entities.is_empty();

        let masked_for_llm = masker::mask_with_parens_by_entities(&req.prompt, &raw_prompt_entities);
        let llm_analysis = match &state.llm {
            Some(runtime) => runtime.analyze(&masked_for_llm).await,
            None => Default::default(),
        };
        llm_processing_ms = llm_analysis.processing_ms;
        llm_reported_sensitive = llm_analysis.has_sensitive;

        let llm_raw: Vec<LlmRawEntity> = llm_analysis.entities;
        let llm_rebased = span_merger::rebase_llm_entities(&req.prompt, &llm_raw);
        tagged = span_merger::merge(raw_prompt_entities, llm_rebased);

        is_image_attachment = saved
            .as_ref()
            .map(|(_, r)| matches!(r.ext.as_str(), "png" | "jpg" | "jpeg" | "webp"))
            .unwrap_or(false);
        ocr_text_len_after_strip = ocr_text.trim().chars().count();

        similarity_score = if is_image_attachment && ocr_ran && ocr_text_len_after_strip < MIN_OCR_STRIP_LEN_FOR_SIMILARITY {
            saved
                .as_ref()
                .map(|(_, r)| image_similarity::best_similarity_against_folder(&r.bytes, &state.similarity_blocklist_dir))
        } else {
            None
        };
    }

    let accepted: Vec<Entity> = tagged.iter().map(|t| t.entity.clone()).collect();
    let llm_has_sensitive = llm_reported_sensitive;

    let policy_input = PolicyInput {
        interface: &req.interface,
        host: req.host.as_deref(),
        entities_in_prompt: !accepted.is_empty(),
        regex_in_ocr,
        llm_has_sensitive,
        is_image_attachment,
        ocr_ran,
        ocr_text_len_after_strip,
        similarity_score,
    };
    let decision = policy::decide(&snapshot, &policy_input);

    let modified_prompt = match decision.final_prompt_source {
        PromptSource::Original => req.prompt.clone(),
        PromptSource::Masked => masker::mask_by_entities(&req.prompt, &accepted),
    };

    let alert = build_alert(&tagged);

    let attachment_out = if let Some((path, raw)) = &saved {
        let (bytes, file_change) = if monitored {
            let outcome = redactor::redact(&path.path, raw, state.ocr.as_ref()).await;
            let changed = outcome.bytes != raw.bytes;
            (outcome.bytes, changed)
        } else {
            (raw.bytes.clone(), false)
        };

        Some(AttachmentOut {
            format: raw.ext.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            file_change,
        })
    } else {
        None
    };

    let processing_ms = (started.elapsed().as_millis() as u64).max(llm_processing_ms);

    let attachment_json = req.attachment.as_ref().map(|item| {
        serde_json::json!({
            "format": item.format,
            "data": item.data,
        })
    });

    let record = LogRecord {
        request_id: request_id.clone(),
        time: req.time.clone(),
        public_ip: req.public_ip.clone(),
        private_ip: req.private_ip.clone(),
        host: req.host.clone(),
        hostname: req.pc_name.clone(),
        prompt: req.prompt.clone(),
        attachment: attachment_json,
        interface: req.interface.clone(),
        modified_prompt: modified_prompt.clone(),
        has_sensitive: !accepted.is_empty(),
        entities: accepted.clone(),
        processing_ms,
        file_blocked: decision.file_blocked,
        allow: decision.allow,
        action: decision.action,
        created_at: Utc::now(),
    };

    state.log_repo.create(&record).await?;

    Ok(InspectResponse {
        request_id,
        host: req.host,
        modified_prompt,
        has_sensitive: !accepted.is_empty(),
        entities: accepted,
        processing_ms,
        file_blocked: decision.file_blocked,
        allow: decision.allow,
        action: decision.action,
        alert,
        attachment: attachment_out,
    })
}

/// Raw regex pass plus the number-normalizer recovery pass, combined.
/// Overlap de-duplication against the raw pass already
/// happens inside `detect_recovered`.
fn detect_with_normalizer_recovery(text: &str) -> Vec<Entity> {
    let raw = regex_detector::detect(text);
    let recovered = number_normalizer::detect_recovered(text, &raw);
    let mut all = raw;
    all.extend(recovered);
    all
}

/// Two-clause alert sentence grouped by provenance.
/// Falls back to a plain `"Detected: <labels>"` line in the
/// (practically unreachable) case where entities exist but neither
/// clause could be built.
fn build_alert(tagged: &[TaggedEntity]) -> String {
    if tagged.is_empty() {
        return String::new();
    }

    let regex_labels = unique_labels(tagged, Provenance::Regex);
    let llm_labels = unique_labels(tagged, Provenance::Llm);

    let mut clauses = Vec::new();
    if !regex_labels.is_empty() {
        clauses.push(format!("{} 값이 정규식으로 식별되었습니다.", regex_labels.join(", ")));
    }
    if !llm_labels.is_empty() {
        clauses.push(format!("{} 값은 AI로 식별되었습니다.", llm_labels.join(", ")));
    }

    if clauses.is_empty() {
        let all_labels = regex_labels.into_iter().chain(llm_labels).collect::<Vec<_>>().join(", ");
        return format!("Detected: {all_labels}");
    }

    clauses.join(" ")
}

fn unique_labels(tagged: &[TaggedEntity], provenance: Provenance) -> Vec<String> {
    let mut seen = Vec::new();
    for t in tagged {
        if t.provenance == provenance {
            let label = Label::as_str(&t.entity.label).to_string();
            if !seen.contains(&label) {
                seen.push(label);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_detector::LlmBackend;
    use crate::models::{Action, AttachmentIn, ResponseMethod};
    use crate::ocr::NullOcrEngine;
    use async_trait::async_trait;
    use sqlx::SqlitePool;

    async fn make_state(llm: Option<Arc<LlmDetectorRuntime>>) -> (AppState, SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let log_repo = LogRepository::new(pool.clone());
        log_repo.migrate().await.unwrap();
        let settings = Arc::new(SettingsStore::new(pool.clone()));

        let state = AppState {
            attachment_store: AttachmentStore::new(dir.path().join("downloads")),
            settings,
            log_repo,
            ocr: Arc::new(NullOcrEngine),
            llm,
            similarity_blocklist_dir: dir.path().join("blocklist"),
        };
        (state, pool, dir)
    }

    fn base_request(prompt: &str) -> InspectRequest {
        InspectRequest {
            time: "2026-07-28T10:00:00".to_string(),
            public_ip: Some("1.2.3.4".to_string()),
            private_ip: None,
            host: Some("chatgpt.com".to_string()),
            pc_name: Some("laptop-01".to_string()),
            prompt: prompt.to_string(),
            attachment: None,
            interface: "llm".to_string(),
        }
    }

    async fn set_response_method(pool: &SqlitePool, settings: &SettingsStore, method: &str) {
        sqlx::query("CREATE TABLE policy_settings (response_method TEXT, service_filters TEXT, version INTEGER)")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO policy_settings VALUES (?, '{}', 1)")
            .bind(method)
            .execute(pool)
            .await
            .unwrap();
        settings.refresh().await.unwrap();
    }

    #[tokio::test]
    async fn plain_prompt_with_no_entities_allows() {
        let (state, _pool, _dir) = make_state(None).await;
        let resp = inspect(&state, base_request("hello there")).await.unwrap();
        assert!(!resp.has_sensitive);
        assert_eq!(resp.action, Action::Allow);
        assert!(resp.allow);
        assert_eq!(resp.modified_prompt, "hello there");
    }

    #[tokio::test]
    async fn phone_in_prompt_masks_and_allows_by_default() {
        let (state, _pool, _dir) = make_state(None).await;
        let resp = inspect(&state, base_request("내 번호 010-1234-5678 이야")).await.unwrap();
        assert!(resp.has_sensitive);
        assert_eq!(resp.entities.len(), 1);
        assert_eq!(resp.entities[0].label, Label::Phone);
        assert_eq!(resp.modified_prompt, "내 번호 PHONE 이야");
        assert_eq!(resp.action, Action::MaskAndAllow);
        assert!(resp.allow);
        assert!(resp.alert.contains("PHONE"));
    }

    #[tokio::test]
    async fn card_number_block_policy_blocks_request() {
        let (state, pool, _dir) = make_state(None).await;
        set_response_method(&pool, &state.settings, "block").await;

        let resp = inspect(&state, base_request("card 4539 1488 0343 6467")).await.unwrap();
        assert!(resp.has_sensitive);
        assert_eq!(resp.entities[0].label, Label::CardNumber);
        assert_eq!(resp.modified_prompt, "card CARD_NUMBER");
        assert_eq!(resp.action, Action::BlockSensitive);
        assert!(!resp.allow);
    }

    #[tokio::test]
    async fn allow_policy_keeps_original_prompt() {
        let (state, pool, _dir) = make_state(None).await;
        set_response_method(&pool, &state.settings, "allow").await;

        let resp = inspect(&state, base_request("내 번호 010-1234-5678 이야")).await.unwrap();
        assert_eq!(resp.action, Action::AllowSensitive);
        assert!(resp.allow);
        assert_eq!(resp.modified_prompt, "내 번호 010-1234-5678 이야");
    }

    struct StubBackend(&'static str);

    #[async_trait]
    impl LlmBackend for StubBackend {
        async fn generate(&self, _prompt: &str, _max_new_tokens: u32) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn llm_only_entity_is_merged_and_masked() {
        let backend = StubBackend(r#"{"has_sensitive": true, "entities": [{"type": "NAME", "value": "홍길동"}]}"#);
        let llm = Arc::new(LlmDetectorRuntime::new(Box::new(backend), 5, 64));
        let (state, _pool, _dir) = make_state(Some(llm)).await;

        let resp = inspect(&state, base_request("제 이름은 홍길동입니다")).await.unwrap();
        assert!(resp.has_sensitive);
        assert!(resp.entities.iter().any(|e| e.label == Label::Name));
        assert!(resp.modified_prompt.contains("NAME"));
        assert!(resp.alert.contains("AI"));
    }

    #[tokio::test]
    async fn unmonitored_interface_allows_unconditionally() {
        let (state, _pool, _dir) = make_state(None).await;
        let mut req = base_request("010-1234-5678");
        req.interface = "mcp".to_string();
        let resp = inspect(&state, req).await.unwrap();
        assert_eq!(resp.action, Action::AllowUnmonitored);
        assert!(resp.allow);
        assert!(!resp.has_sensitive);
    }

    #[tokio::test]
    async fn attachment_round_trips_when_no_redaction_applies() {
        let (state, _pool, _dir) = make_state(None).await;
        let mut req = base_request("hello");
        req.attachment = Some(AttachmentIn {
            format: "txt".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(b"clean text"),
            size: None,
        });
        let resp = inspect(&state, req).await.unwrap();
        let att = resp.attachment.unwrap();
        assert_eq!(att.format, "txt");
        assert!(!att.file_change);
    }

    #[tokio::test]
    async fn attachment_with_sensitive_text_is_redacted() {
        let (state, _pool, _dir) = make_state(None).await;
        let mut req = base_request("hello");
        req.attachment = Some(AttachmentIn {
            format: "txt".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(b"phone: 010-1234-5678"),
            size: None,
        });
        let resp = inspect(&state, req).await.unwrap();
        let att = resp.attachment.unwrap();
        assert!(att.file_change);
    }

    #[tokio::test]
    async fn unmonitored_attachment_passes_through_unchanged() {
        let (state, pool, _dir) = make_state(None).await;
        sqlx::query("CREATE TABLE policy_settings (response_method TEXT, service_filters TEXT, version INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO policy_settings VALUES ('mask', '{\"llm\":{\"gpt\":false}}', 1)")
            .execute(&pool)
            .await
            .unwrap();
        state.settings.refresh().await.unwrap();

        let mut req = base_request("hello");
        req.host = Some("chatgpt.com".to_string());
        req.attachment = Some(AttachmentIn {
            format: "txt".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(b"phone: 010-1234-5678"),
            size: None,
        });
        let resp = inspect(&state, req).await.unwrap();
        assert_eq!(resp.action, Action::AllowUnmonitored);
        let att = resp.attachment.unwrap();
        assert!(!att.file_change);
    }
}
