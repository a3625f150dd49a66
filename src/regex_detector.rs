use crate::entities::Label;
use crate::models::Entity;
use once_cell::sync::Lazy;
use regex::Regex;

/// Label-tagged pattern table. Patterns are evaluated in
/// declaration order; EMAIL uses capturing groups to exclude surrounding
/// angle brackets, CARD_NUMBER/IMEI are Luhn-gated after matching.
static PATTERNS: Lazy<Vec<(Label, Regex)>> = Lazy::new(|| {
    vec![
        (
            Label::Email,
            Regex::new(r"(?i)<?([a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,})>?()").unwrap(),
        ),
        (
            Label::Phone,
            Regex::new(r"\b01[016789][-.\s]?\d{3,4}[-.\s]?\d{4}\b").unwrap(),
        ),
        (
            Label::Ipv4,
            Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b")
                .unwrap(),
        ),
        (
            Label::Ipv6,
            Regex::new(r"\b(?:[A-Fa-f0-9]{1,4}:){7}[A-Fa-f0-9]{1,4}\b").unwrap(),
        ),
        (
            Label::MacAddress,
            Regex::new(r"\b[0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5}\b").unwrap(),
        ),
        (
            Label::CardNumber,
            Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap(),
        ),
        (Label::Imei, Regex::new(r"\b\d{15}\b").unwrap()),
        (
            Label::CardExpiry,
            Regex::new(r"\b(0[1-9]|1[0-2])/([0-9]{2}|20[0-9]{2})\b").unwrap(),
        ),
        (Label::CardCvv, Regex::new(r"\bcvv\D{0,3}(\d{3,4})\b").unwrap()),
        (
            Label::BankAccount,
            Regex::new(r"\b\d{2,6}-\d{2,6}-\d{2,8}\b").unwrap(),
        ),
        (
            Label::Jwt,
            Regex::new(r"\bey[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b").unwrap(),
        ),
        (
            Label::GithubPat,
            Regex::new(r"\bgh[pousr]_[A-Za-z0-9]{36,}\b").unwrap(),
        ),
        (
            Label::ApiKey,
            Regex::new(r"\bsk-[A-Za-z0-9]{20,}\b").unwrap(),
        ),
        (
            Label::PrivateKey,
            Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]+?-----END [A-Z ]*PRIVATE KEY-----")
                .unwrap(),
        ),
        (
            Label::PostalCode,
            Regex::new(r"\b\d{5}(?:-\d{4})?\b").unwrap(),
        ),
        (
            Label::ResidentId,
            Regex::new(r"\b\d{6}-[1-4]\d{6}\b").unwrap(),
        ),
    ]
});

fn luhn_ok(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() {
        return false;
    }
    let mut total = 0u32;
    let mut alt = false;
    for &d in digits.iter().rev() {
        let d = if alt {
            if d > 4 {
                d * 2 - 9
            } else {
                d * 2
            }
        } else {
            d
        };
        total += d;
        alt = !alt;
    }
    total % 10 == 0
}

fn is_card_pan(value: &str) -> bool {
    let digit_count = value.chars().filter(|c| c.is_ascii_digit()).count();
    (13..=19).contains(&digit_count) && luhn_ok(value)
}

fn is_imei(value: &str) -> bool {
    let digit_count = value.chars().filter(|c| c.is_ascii_digit()).count();
    digit_count == 15 && luhn_ok(value)
}

/// Detect all entities in `text` via the label-ordered pattern table.
pub fn detect(text: &str) -> Vec<Entity> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut found: Vec<(usize, usize, Label, String)> = Vec::new();

    for (label, re) in PATTERNS.iter() {
        for caps in re.captures_iter(text) {
            let (value, begin, end) = if *label == Label::Email {
                let m = pick_email_group(&caps);
                (m.as_str().to_string(), char_index(text, m.start()), char_index(text, m.end()))
            } else {
                let m = caps.get(0).unwrap();
                (m.as_str().to_string(), char_index(text, m.start()), char_index(text, m.end()))
            };

            if *label == Label::CardNumber && !is_card_pan(&value) {
                continue;
            }
            if *label == Label::Imei && !is_imei(&value) {
                continue;
            }

            found.push((begin, end, *label, value));
        }
    }

    if found.is_empty() {
        return Vec::new();
    }

    // Sort by (begin asc, length desc); select greedily, label-agnostic overlap.
    found.sort_by(|a, b| a.0.cmp(&b.0).then((b.1 - b.0).cmp(&(a.1 - a.0))));

    let mut selected: Vec<(usize, usize, Label, String)> = Vec::new();
    for cand in found {
        let overlaps = selected
            .iter()
            .any(|s| !(cand.1 <= s.0 || s.1 <= cand.0));
        if overlaps {
            continue;
        }
        selected.push(cand);
    }

    selected
        .into_iter()
        .map(|(begin, end, label, value)| Entity { label, value, begin, end })
        .collect()
}

/// EMAIL match preference order: group 1, group 2, fallback to full
/// match, so the captured span excludes any surrounding angle brackets.
fn pick_email_group<'t>(caps: &regex::Captures<'t>) -> regex::Match<'t> {
    for gi in [1, 2] {
        if let Some(m) = caps.get(gi) {
            if !m.as_str().is_empty() {
                return m;
            }
        }
    }
    caps.get(0).unwrap()
}

/// Convert a byte offset into `text` to a character offset.
fn char_index(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].chars().count()
}
