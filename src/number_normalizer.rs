use crate::models::Entity;
use crate::regex_detector;

/// Normalize obfuscated numeric sequences so a second regex pass can find
/// entities broken up by zero-width characters or full-width digit forms.
/// Stripping zero-width characters shortens the text, so callers that need
/// to rebase a match back onto the original string should use
/// `normalize_with_positions` instead, which keeps a parallel index map.
pub fn normalize_obfuscated_numbers(text: &str) -> String {
    normalize_with_positions(text).0
}

/// Same transform as `normalize_obfuscated_numbers`, but also returns a map
/// from each character's index in the normalized string to its original
/// index in `text`. Since zero-width characters are dropped rather than
/// replaced, the normalized string is shorter than the original whenever any
/// are present, and offsets can't be reused directly — this map is what lets
/// `detect_recovered` translate a normalized-text match back onto the
/// original text's character positions.
fn normalize_with_positions(text: &str) -> (String, Vec<usize>) {
    let mut out = String::new();
    let mut positions = Vec::new();
    for (idx, c) in text.chars().enumerate() {
        if is_zero_width(c) {
            continue;
        }
        out.push(fullwidth_to_ascii_digit(c));
        positions.push(idx);
    }
    (out, positions)
}

fn is_zero_width(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{00AD}'
    )
}

fn fullwidth_to_ascii_digit(c: char) -> char {
    match c {
        '\u{FF10}'..='\u{FF19}' => {
            let offset = c as u32 - '\u{FF10}' as u32;
            char::from_u32('0' as u32 + offset).unwrap()
        }
        other => other,
    }
}

/// Run the second regex pass on the normalized text, rebase each span back
/// onto the original text via the position map, recover its value from the
/// *original* slice, and drop any span overlapping a raw-pass span. `raw` is
/// the set of entities already found on the unnormalized text.
pub fn detect_recovered(original: &str, raw: &[Entity]) -> Vec<Entity> {
    let (normalized, positions) = normalize_with_positions(original);
    if normalized == original {
        return Vec::new();
    }

    let original_chars: Vec<char> = original.chars().collect();

    regex_detector::detect(&normalized)
        .into_iter()
        .filter_map(|e| {
            if e.end == 0 || e.end > positions.len() {
                return None;
            }
            let begin = positions[e.begin];
            let end = positions[e.end - 1] + 1;
            let value = original_chars[begin..end].iter().collect();
            Some(Entity { label: e.label, value, begin, end })
        })
        .filter(|e| !raw.iter().any(|r| r.overlaps(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Label;

    #[test]
    fn strips_zero_width_characters() {
        let text = "010\u{200B}-1234-5678";
        assert_eq!(normalize_obfuscated_numbers(text), "010-1234-5678");
    }

    #[test]
    fn converts_fullwidth_digits() {
        let text = "\u{FF10}\u{FF11}\u{FF10}";
        assert_eq!(normalize_obfuscated_numbers(text), "010");
    }

    #[test]
    fn identical_text_yields_no_recovered_spans() {
        let text = "hello world";
        assert!(detect_recovered(text, &[]).is_empty());
    }

    #[test]
    fn recovered_span_excluded_when_overlapping_raw() {
        let original = "010\u{200B}-1234-5678";
        let raw = regex_detector::detect(original);
        // raw detection already finds the phone despite the zero-width char
        // since \b matches across it in this pattern only if boundaries hold;
        // regardless, recovered spans overlapping raw must be dropped.
        let recovered = detect_recovered(original, &raw);
        for r in &recovered {
            assert!(raw.iter().all(|x| !x.overlaps(r)));
        }
    }

    #[test]
    fn recovered_entity_value_matches_original_slice() {
        let original = "phone \u{FF10}\u{FF11}\u{FF10}-1234-5678 here";
        let recovered = detect_recovered(original, &[]);
        let chars: Vec<char> = original.chars().collect();
        for e in &recovered {
            assert_eq!(e.label, Label::Phone);
            let slice: String = chars[e.begin..e.end].iter().collect();
            assert_eq!(slice, e.value);
        }
    }

    #[test]
    fn recovered_span_anchors_past_a_preceding_zero_width_char() {
        // The zero-width char sits before the matched digits, so it must
        // not shift the recovered span's begin/end off the true anchor.
        let original = "call \u{200B}010-1234-5678 now";
        let recovered = detect_recovered(original, &[]);
        assert_eq!(recovered.len(), 1);
        let chars: Vec<char> = original.chars().collect();
        let slice: String = chars[recovered[0].begin..recovered[0].end].iter().collect();
        assert_eq!(slice, recovered[0].value);
        assert_eq!(recovered[0].value, "010-1234-5678");
    }
}
