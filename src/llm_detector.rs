use crate::entities::Label;
use crate::span_merger::LlmRawEntity;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Result of one LLM Detector Runtime call.
#[derive(Debug, Clone, Default)]
pub struct LlmAnalysis {
    pub has_sensitive: bool,
    pub entities: Vec<LlmRawEntity>,
    pub processing_ms: u64,
}

/// Generation backend. The actual model weights are out of scope here;
/// this trait is the seam between the orchestration logic below (which is
/// fully implemented and tested) and whatever inference endpoint is
/// configured.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(&self, prompt: &str, max_new_tokens: u32) -> anyhow::Result<String>;
}

/// HTTP-backed implementation: POSTs to a local Ollama-style
/// `/api/generate` endpoint.
pub struct HttpLlmBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLlmBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[derive(Deserialize)]
struct GenerateReply {
    response: String,
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn generate(&self, prompt: &str, max_new_tokens: u32) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "prompt": prompt,
            "max_tokens": max_new_tokens,
            "stream": false,
        });
        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let reply: GenerateReply = resp.json().await?;
        Ok(reply.response)
    }
}

const SYS_PROMPT_WHITELIST_NOTE: &str =
    "Return only a compact JSON object with has_sensitive and entities, labels drawn from the closed whitelist.";

fn build_prompt(masked_prompt: &str) -> String {
    format!("{SYS_PROMPT_WHITELIST_NOTE}\n\nText:\n{masked_prompt}")
}

/// A single process-wide handle serializing generation calls via a mutex:
/// at most one generation runs at a time, a 20s timeout
/// bounds each call, and on timeout or any parse failure the safe fallback
/// (`{has_sensitive: false, entities: []}`) is returned.
pub struct LlmDetectorRuntime {
    backend: Box<dyn LlmBackend>,
    lock: Mutex<()>,
    timeout: Duration,
    max_new_tokens: u32,
}

impl LlmDetectorRuntime {
    pub fn new(backend: Box<dyn LlmBackend>, timeout_secs: u64, max_new_tokens: u32) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
            timeout: Duration::from_secs(timeout_secs),
            max_new_tokens,
        }
    }

    pub async fn analyze(&self, masked_prompt: &str) -> LlmAnalysis {
        let _permit = self.lock.lock().await;
        let started = Instant::now();

        let prompt = build_prompt(masked_prompt);
        let call = self.backend.generate(&prompt, self.max_new_tokens);

        let raw = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) => text,
            Ok(Err(_)) | Err(_) => {
                return LlmAnalysis {
                    processing_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                }
            }
        };

        let mut analysis = parse_generation(&raw);
        analysis.processing_ms = started.elapsed().as_millis() as u64;
        analysis
    }
}

/// Parse a model generation: extract the last top-level balanced JSON
/// object, tolerating role
/// headers and code fences; validate shape; drop entities whose label is
/// not in the whitelist or whose value is empty after trimming.
fn parse_generation(raw: &str) -> LlmAnalysis {
    let Some(json_str) = extract_json(raw) else {
        return LlmAnalysis::default();
    };

    let Ok(value) = serde_json::from_str::<Value>(&json_str) else {
        return LlmAnalysis::default();
    };

    let Some(obj) = value.as_object() else {
        return LlmAnalysis::default();
    };

    let has_sensitive = obj.get("has_sensitive").and_then(Value::as_bool).unwrap_or(false);

    let entities = obj
        .get("entities")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|e| {
                    let obj = e.as_object()?;
                    let label_str = obj.get("type").or_else(|| obj.get("label"))?.as_str()?;
                    let value = obj.get("value")?.as_str()?.trim().to_string();
                    if value.is_empty() {
                        return None;
                    }
                    let label: Label = label_str.parse().ok()?;
                    Some(LlmRawEntity { label, value })
                })
                .collect()
        })
        .unwrap_or_default();

    LlmAnalysis { has_sensitive, entities, processing_ms: 0 }
}

/// Extract the last top-level balanced JSON object from free-form model
/// output: prefer a fenced ```json code block, else scan for a
/// string/escape-aware balanced-brace region, else backward-scan from the
/// last `}` to its matching `{`.
fn extract_json(raw: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced(raw) {
        return Some(fenced);
    }
    if let Some(balanced) = extract_balanced(raw) {
        return Some(balanced);
    }
    extract_backward(raw)
}

fn extract_fenced(raw: &str) -> Option<String> {
    let marker = "```";
    let mut search_from = 0usize;
    let mut last = None;
    while let Some(start_rel) = raw[search_from..].find(marker) {
        let start = search_from + start_rel + marker.len();
        let after_lang = raw[start..].find('\n').map(|i| start + i + 1).unwrap_or(start);
        if let Some(end_rel) = raw[after_lang..].find(marker) {
            let end = after_lang + end_rel;
            let body = raw[after_lang..end].trim();
            if body.starts_with('{') {
                last = Some(body.to_string());
            }
            search_from = end + marker.len();
        } else {
            break;
        }
    }
    last
}

fn extract_balanced(raw: &str) -> Option<String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut best: Option<String> = None;
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(end) = matching_brace_end(&chars, i) {
                let candidate: String = chars[i..=end].iter().collect();
                best = Some(candidate);
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    best
}

fn matching_brace_end(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &c) in chars[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_backward(raw: &str) -> Option<String> {
    let chars: Vec<char> = raw.chars().collect();
    let last_close = chars.iter().rposition(|&c| c == '}')?;
    let mut depth = 0i32;
    for i in (0..=last_close).rev() {
        match chars[i] {
            '}' => depth += 1,
            '{' => {
                depth -= 1;
                if depth == 0 {
                    return Some(chars[i..=last_close].iter().collect());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBackend(String);

    #[async_trait]
    impl LlmBackend for StubBackend {
        async fn generate(&self, _prompt: &str, _max_new_tokens: u32) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl LlmBackend for SlowBackend {
        async fn generate(&self, _prompt: &str, _max_new_tokens: u32) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("{}".to_string())
        }
    }

    #[tokio::test]
    async fn parses_clean_json_response() {
        let runtime = LlmDetectorRuntime::new(
            Box::new(StubBackend(
                r#"{"has_sensitive": true, "entities": [{"type": "NAME", "value": "홍길동"}]}"#.to_string(),
            )),
            20,
            256,
        );
        let result = runtime.analyze("어떤 텍스트").await;
        assert!(result.has_sensitive);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].label, Label::Name);
        assert_eq!(result.entities[0].value, "홍길동");
    }

    #[tokio::test]
    async fn extracts_from_fenced_code_block() {
        let raw = "Sure, here you go:\n```json\n{\"has_sensitive\": false, \"entities\": []}\n```\nDone.";
        let runtime = LlmDetectorRuntime::new(Box::new(StubBackend(raw.to_string())), 20, 256);
        let result = runtime.analyze("x").await;
        assert!(!result.has_sensitive);
        assert!(result.entities.is_empty());
    }

    #[tokio::test]
    async fn drops_unknown_labels_and_empty_values() {
        let raw = r#"{"has_sensitive": true, "entities": [
            {"type": "NOT_A_REAL_LABEL", "value": "x"},
            {"type": "NAME", "value": "   "},
            {"type": "EMAIL", "value": "a@b.co"}
        ]}"#;
        let runtime = LlmDetectorRuntime::new(Box::new(StubBackend(raw.to_string())), 20, 256);
        let result = runtime.analyze("x").await;
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].label, Label::Email);
    }

    #[tokio::test]
    async fn malformed_output_yields_safe_fallback() {
        let runtime = LlmDetectorRuntime::new(Box::new(StubBackend("not json at all".to_string())), 20, 256);
        let result = runtime.analyze("x").await;
        assert!(!result.has_sensitive);
        assert!(result.entities.is_empty());
    }

    #[tokio::test]
    async fn timeout_yields_safe_fallback() {
        let runtime = LlmDetectorRuntime::new(Box::new(SlowBackend), 1, 256);
        let started = Instant::now();
        let result = runtime.analyze("x").await;
        assert!(!result.has_sensitive);
        assert!(result.entities.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn backward_scan_finds_trailing_object_after_prose() {
        let raw = "The model thinks: {\"has_sensitive\": false, \"entities\": []}";
        let extracted = extract_json(raw).unwrap();
        assert!(extracted.starts_with('{'));
        assert!(extracted.ends_with('}'));
    }

    #[test]
    fn balanced_scan_ignores_braces_inside_strings() {
        let raw = r#"{"has_sensitive": false, "entities": [{"type": "NAME", "value": "a{b}c"}]}"#;
        let extracted = extract_json(raw).unwrap();
        let value: Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(value["entities"][0]["value"], "a{b}c");
    }
}
