use crate::models::{Action, PolicySnapshot, ResponseMethod};

/// Host-substring table consulted when a per-interface filter map exists
/// but doesn't uniformly disable everything. First substring
/// match, in table order, wins.
const HOST_SUBSTRING_TABLE: &[(&str, &str)] = &[
    ("gpt", "chatgpt"),
    ("claude", "claude"),
    ("gemini", "gemini"),
    ("copilot", "copilot"),
    ("perplexity", "perplexity"),
];

/// Inputs consumed by a single policy decision.
pub struct PolicyInput<'a> {
    pub interface: &'a str,
    pub host: Option<&'a str>,
    pub entities_in_prompt: bool,
    pub regex_in_ocr: bool,
    pub llm_has_sensitive: bool,
    pub is_image_attachment: bool,
    pub ocr_ran: bool,
    pub ocr_text_len_after_strip: usize,
    pub similarity_score: Option<f64>,
}

/// Outcome of the policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
    Original,
    Masked,
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyDecision {
    pub monitored: bool,
    pub allow: bool,
    pub file_blocked: bool,
    pub action: Action,
    pub final_prompt_source: PromptSource,
}

const SIMILARITY_OVERRIDE_THRESHOLD: f64 = 0.4;
const SIMILARITY_OCR_TEXT_MAX_LEN: usize = 3;

/// Determine whether a request is monitored for `interface`. `host` is
/// used to resolve the host-substring table when the filter map isn't
/// uniformly off.
pub fn is_monitored(snapshot: &PolicySnapshot, interface: &str, host: Option<&str>) -> bool {
    let Some(filters) = snapshot.service_filters.get(interface) else {
        return true;
    };
    if filters.is_empty() {
        return true;
    }
    if filters.values().all(|v| !*v) {
        return false;
    }

    let Some(host) = host else { return true };
    let host_lower = host.to_lowercase();

    for (key, substring) in HOST_SUBSTRING_TABLE {
        if host_lower.contains(substring) {
            return filters.get(*key).copied().unwrap_or(true);
        }
    }
    true
}

/// Full policy decision.
pub fn decide(snapshot: &PolicySnapshot, input: &PolicyInput) -> PolicyDecision {
    let monitored = is_monitored(snapshot, input.interface, input.host);

    if !monitored {
        return PolicyDecision {
            monitored: false,
            allow: true,
            file_blocked: false,
            action: Action::AllowUnmonitored,
            final_prompt_source: PromptSource::Original,
        };
    }

    let sensitive_any = input.entities_in_prompt || input.regex_in_ocr || input.llm_has_sensitive;

    let mut decision = if sensitive_any {
        match snapshot.response_method {
            ResponseMethod::Block => {
                let file_blocked = input.regex_in_ocr;
                PolicyDecision {
                    monitored: true,
                    allow: false,
                    file_blocked,
                    action: if file_blocked { Action::BlockFileSensitive } else { Action::BlockSensitive },
                    final_prompt_source: PromptSource::Masked,
                }
            }
            ResponseMethod::Allow => PolicyDecision {
                monitored: true,
                allow: true,
                file_blocked: false,
                action: Action::AllowSensitive,
                final_prompt_source: PromptSource::Original,
            },
            ResponseMethod::Mask => PolicyDecision {
                monitored: true,
                allow: true,
                file_blocked: false,
                action: Action::MaskAndAllow,
                final_prompt_source: PromptSource::Masked,
            },
        }
    } else {
        PolicyDecision {
            monitored: true,
            allow: true,
            file_blocked: false,
            action: Action::Allow,
            final_prompt_source: PromptSource::Original,
        }
    };

    let similarity_eligible = input.is_image_attachment
        && input.ocr_ran
        && input.ocr_text_len_after_strip < SIMILARITY_OCR_TEXT_MAX_LEN;

    if similarity_eligible {
        if let Some(score) = input.similarity_score {
            if score >= SIMILARITY_OVERRIDE_THRESHOLD {
                decision.file_blocked = true;
                decision.allow = false;
                decision.action = Action::BlockUploadSimilar;
            }
        }
    }

    decision
}
