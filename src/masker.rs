use crate::models::Entity;

/// Replace each entity's range with its bare label token, applied
/// right-to-left so earlier spans' indices stay valid. Used to build the
/// final response prompt.
pub fn mask_by_entities(text: &str, entities: &[Entity]) -> String {
    mask(text, entities, false)
}

/// Same as `mask_by_entities` but wraps each replacement token in
/// parentheses. Used exclusively to build the prompt fed to the LLM
/// Detector.
pub fn mask_with_parens_by_entities(text: &str, entities: &[Entity]) -> String {
    mask(text, entities, true)
}

fn mask(text: &str, entities: &[Entity], parens: bool) -> String {
    if entities.is_empty() {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();

    // When two entities overlap (only possible via the value-fallback path),
    // the earlier-starting, longer span wins.
    let mut ordered: Vec<&Entity> = entities.iter().collect();
    ordered.sort_by(|a, b| a.begin.cmp(&b.begin).then((b.end - b.begin).cmp(&(a.end - a.begin))));

    let mut selected: Vec<&Entity> = Vec::new();
    for e in ordered {
        if selected.iter().any(|s| s.overlaps(e)) {
            continue;
        }
        selected.push(e);
    }

    selected.sort_by(|a, b| b.begin.cmp(&a.begin));

    let mut result = chars;
    for e in selected {
        let token = if parens {
            format!("({})", e.label.as_str())
        } else {
            e.label.as_str().to_string()
        };
        let replacement: Vec<char> = token.chars().collect();
        result.splice(e.begin..e.end, replacement);
    }

    result.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Label;

    fn entity(label: Label, value: &str, begin: usize, end: usize) -> Entity {
        Entity { label, value: value.to_string(), begin, end }
    }

    #[test]
    fn masks_single_entity_without_parens() {
        let text = "내 번호 010-1234-5678 이야";
        let ents = vec![entity(Label::Phone, "010-1234-5678", 5, 18)];
        assert_eq!(mask_by_entities(text, &ents), "내 번호 PHONE 이야");
    }

    #[test]
    fn masks_with_parens_for_llm_prompt() {
        let text = "card 4539 1488 0343 6467";
        let ents = vec![entity(Label::CardNumber, "4539 1488 0343 6467", 5, 24)];
        assert_eq!(mask_with_parens_by_entities(text, &ents), "card (CARD_NUMBER)");
    }

    #[test]
    fn no_entities_returns_text_unchanged() {
        let text = "hello world";
        assert_eq!(mask_by_entities(text, &[]), text);
    }

    #[test]
    fn right_to_left_replacement_preserves_earlier_span_indices() {
        let text = "a@b.co and 010-1234-5678";
        let ents = vec![
            entity(Label::Email, "a@b.co", 0, 6),
            entity(Label::Phone, "010-1234-5678", 11, 24),
        ];
        assert_eq!(mask_by_entities(text, &ents), "EMAIL and PHONE");
    }

    #[test]
    fn overlapping_entities_prefer_earlier_longer_span() {
        let text = "0123456789";
        let ents = vec![
            entity(Label::CardNumber, "012345", 0, 6),
            entity(Label::Phone, "01234", 0, 5),
        ];
        let masked = mask_by_entities(text, &ents);
        assert_eq!(masked, "CARD_NUMBER6789");
    }
}
