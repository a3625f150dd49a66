use super::{sibling_path, RedactionOutcome};
use crate::models::RawAttachment;
use crate::regex_detector;
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Text-node tag per OOXML part family: Word paragraphs use
/// `w:t`, PowerPoint runs use `a:t`, Excel shared strings use `t`.
fn text_tags_for_ext(ext: &str) -> &'static [&'static [u8]] {
    match ext {
        "docx" => &[b"w:t"],
        "pptx" => &[b"a:t"],
        "xlsx" => &[b"t"],
        _ => &[],
    }
}

/// Which ZIP entry within the archive carries the text nodes we walk.
fn part_matches(ext: &str, name: &str) -> bool {
    match ext {
        "docx" => name == "word/document.xml",
        "pptx" => name.starts_with("ppt/slides/slide") && name.ends_with(".xml"),
        "xlsx" => name == "xl/sharedStrings.xml",
        _ => false,
    }
}

/// OOXML (docx/pptx/xlsx): walk all textual runs/cells and apply the
/// regex pattern table directly, substituting each match with the bare
/// label token. If any substitution occurred, write a sibling
/// `name.detection.ext`; otherwise leave disk untouched.
pub fn redact_office(original_path: &Path, raw: &RawAttachment) -> anyhow::Result<RedactionOutcome> {
    let tags = text_tags_for_ext(&raw.ext);
    if tags.is_empty() {
        return Ok(RedactionOutcome::unchanged(raw.bytes.clone()));
    }

    let mut archive = ZipArchive::new(Cursor::new(&raw.bytes))?;
    let mut any_changed = false;

    let mut out_buf = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut out_buf);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;

            if part_matches(&raw.ext, &name) {
                if let Ok(text) = String::from_utf8(contents.clone()) {
                    let (rewritten, changed) = redact_xml_text_nodes(&text, tags)?;
                    if changed {
                        any_changed = true;
                        contents = rewritten.into_bytes();
                    }
                }
            }

            writer.start_file(name, options)?;
            writer.write_all(&contents)?;
        }

        writer.finish()?;
    }

    if !any_changed {
        return Ok(RedactionOutcome::unchanged(raw.bytes.clone()));
    }

    let bytes = out_buf.into_inner();
    let sibling = sibling_path(original_path, "detection");
    std::fs::write(&sibling, &bytes)?;

    Ok(RedactionOutcome { bytes, changed: true, sibling_path: Some(sibling) })
}

/// Plain/CSV: regex over each line, sibling `name.detection.ext` written
/// only if something changed.
pub fn redact_plain(original_path: &Path, raw: &RawAttachment) -> anyhow::Result<RedactionOutcome> {
    let text = String::from_utf8_lossy(&raw.bytes).to_string();
    let mut changed = false;

    let redacted: String = text
        .lines()
        .map(|line| {
            let r = redact_text_with_labels(line);
            if r != line {
                changed = true;
            }
            r
        })
        .collect::<Vec<_>>()
        .join("\n");

    if !changed {
        return Ok(RedactionOutcome::unchanged(raw.bytes.clone()));
    }

    let bytes = redacted.into_bytes();
    let sibling = sibling_path(original_path, "detection");
    std::fs::write(&sibling, &bytes)?;

    Ok(RedactionOutcome { bytes, changed: true, sibling_path: Some(sibling) })
}

/// Walk an XML document's text nodes under any of `tags`, substituting
/// regex matches with their bare label token, and re-serialize.
fn redact_xml_text_nodes(xml: &str, tags: &[&[u8]]) -> anyhow::Result<(String, bool)> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut buf = Vec::new();
    let mut in_text_tag = false;
    let mut changed = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                if tags.iter().any(|t| e.name().as_ref() == *t) {
                    in_text_tag = true;
                }
                writer.write_event(Event::Start(e))?;
            }
            Ok(Event::End(e)) => {
                if tags.iter().any(|t| e.name().as_ref() == *t) {
                    in_text_tag = false;
                }
                writer.write_event(Event::End(e))?;
            }
            Ok(Event::Text(e)) => {
                if in_text_tag {
                    let original = e.unescape().unwrap_or_default().to_string();
                    let redacted = redact_text_with_labels(&original);
                    if redacted != original {
                        changed = true;
                    }
                    writer.write_event(Event::Text(BytesText::new(&redacted)))?;
                } else {
                    writer.write_event(Event::Text(e))?;
                }
            }
            Ok(ev) => {
                writer.write_event(ev)?;
            }
            Err(e) => {
                anyhow::bail!("xml parse error: {e}");
            }
        }
        buf.clear();
    }

    let out_bytes = writer.into_inner().into_inner();
    let out = String::from_utf8(out_bytes)?;
    Ok((out, changed))
}

/// Substitute each regex match with its bare label token, right-to-left
/// so earlier spans' indices stay valid.
fn redact_text_with_labels(text: &str) -> String {
    let entities = regex_detector::detect(text);
    if entities.is_empty() {
        return text.to_string();
    }

    let mut ordered = entities;
    ordered.sort_by(|a, b| b.begin.cmp(&a.begin));

    let mut chars: Vec<char> = text.chars().collect();
    for e in ordered {
        let token: Vec<char> = e.label.as_str().chars().collect();
        chars.splice(e.begin..e.end, token);
    }
    chars.into_iter().collect()
}
