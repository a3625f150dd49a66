use crate::entities::Label;
use crate::models::{Entity, Provenance, TaggedEntity};

/// Raw entity as reported by the LLM Detector: label + value, no offsets.
#[derive(Debug, Clone)]
pub struct LlmRawEntity {
    pub label: Label,
    pub value: String,
}

/// Rebase each LLM entity onto the original prompt using a rolling cursor:
/// search from the cursor forward; if not found, retry from position 0; if still
/// not found, drop it. The cursor advances past each successful match so
/// repeated label+value pairs consume successive leftmost occurrences.
pub fn rebase_llm_entities(original: &str, raw: &[LlmRawEntity]) -> Vec<Entity> {
    let chars: Vec<char> = original.chars().collect();
    let mut cursor = 0usize;
    let mut out = Vec::new();

    for r in raw {
        let value_chars: Vec<char> = r.value.chars().collect();
        if value_chars.is_empty() {
            continue;
        }

        let found = find_from(&chars, &value_chars, cursor).or_else(|| find_from(&chars, &value_chars, 0));

        if let Some(begin) = found {
            let end = begin + value_chars.len();
            cursor = end;
            out.push(Entity { label: r.label, value: r.value.clone(), begin, end });
        }
    }

    out
}

fn find_from(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Merge rebased LLM spans into the regex span list.
/// An LLM span is rejected if it is span-identical to a regex span, or if it
/// shares a label and its range overlaps any regex span of that label.
/// Ties (same label, same range) are resolved in favor of regex provenance.
pub fn merge(regex_entities: Vec<Entity>, llm_entities: Vec<Entity>) -> Vec<TaggedEntity> {
    let mut out: Vec<TaggedEntity> = regex_entities
        .iter()
        .cloned()
        .map(|e| TaggedEntity { entity: e, provenance: Provenance::Regex })
        .collect();

    for llm in llm_entities {
        let rejected = regex_entities.iter().any(|r| {
            let span_identical = r.begin == llm.begin && r.end == llm.end;
            let same_label_overlap = r.label == llm.label && r.range_overlaps(llm.begin, llm.end);
            span_identical || same_label_overlap
        });
        if rejected {
            continue;
        }
        out.push(TaggedEntity { entity: llm, provenance: Provenance::Llm });
    }

    out
}
