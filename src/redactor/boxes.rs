use crate::regex_detector;

/// A redaction rectangle in whatever coordinate space the caller works in
/// (pixels for raster images, PDF points for PDF pages). Shared between
/// the image and PDF redactors since both build boxes the same way: OCR
/// (or PDF text-layer) words, filtered to ones matching a token-level
/// pattern, merged horizontally, then padded.
#[derive(Debug, Clone, PartialEq)]
pub struct WordBox {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// True if `text` matches any token-level regex pattern — i.e. any word
/// whose text looks like a sensitive value on its own.
pub fn is_sensitive_token(text: &str) -> bool {
    !regex_detector::detect(text).is_empty()
}

/// Merge horizontally adjacent boxes on the same line and pad every
/// resulting box. `x_gap_tolerance`/`y_tolerance`/`pad` are absolute units
/// in the caller's coordinate space.
pub fn merge_and_pad(mut words: Vec<WordBox>, x_gap_tolerance: f64, y_tolerance: f64, pad: f64) -> Vec<WordBox> {
    if words.is_empty() {
        return words;
    }

    words.sort_by(|a, b| {
        a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal).then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut merged: Vec<WordBox> = Vec::new();
    for w in words {
        if let Some(last) = merged.last_mut() {
            let same_line = (w.y - last.y).abs() <= y_tolerance;
            let gap = w.x - (last.x + last.width);
            if same_line && gap <= x_gap_tolerance {
                let new_right = (w.x + w.width).max(last.x + last.width);
                last.width = new_right - last.x;
                last.height = last.height.max(w.height);
                last.text = format!("{} {}", last.text, w.text);
                continue;
            }
        }
        merged.push(w);
    }

    merged
        .into_iter()
        .map(|b| WordBox {
            text: b.text,
            x: (b.x - pad).max(0.0),
            y: (b.y - pad).max(0.0),
            width: b.width + pad * 2.0,
            height: b.height + pad * 2.0,
        })
        .collect()
}
