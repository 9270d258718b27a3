//! Normalization of raw agent text before JSON parsing.
//!
//! Agents (and the shells between them and us) regularly hand back text with
//! byte-order marks, mis-decoded punctuation, or a Markdown code fence around
//! the JSON. None of that is the agent's actual answer, so it is stripped.

use std::char::REPLACEMENT_CHARACTER;

/// Mis-decoded byte sequences and their intended text, applied in order.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("ÔÇô", "-"),
    ("ÔÇö", "-"),
    ("â€“", "-"),
    ("â€”", "-"),
    ("ÔÇª", "..."),
    ("â€¦", "..."),
    // A leaked quote inside a broken en-dash; longest form first.
    ("ا\"اخaُ", "-"),
    ("ا\"اخa", "-"),
    ("ا\"اخ", "-"),
];

/// Decode raw agent bytes, honoring UTF-16 (LE/BE) and UTF-8 byte-order marks.
/// Invalid sequences become U+FFFD rather than failing.
pub fn decode(raw: &[u8]) -> String {
    if let Some(body) = raw.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(body, u16::from_le_bytes);
    }
    if let Some(body) = raw.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(body, u16::from_be_bytes);
    }
    let body = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(raw);
    String::from_utf8_lossy(body).into_owned()
}

fn decode_utf16(body: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = body.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    let mut text: String = char::decode_utf16(units)
        .map(|c| c.unwrap_or(REPLACEMENT_CHARACTER))
        .collect();
    if body.len() % 2 == 1 {
        text.push(REPLACEMENT_CHARACTER);
    }
    text
}

/// Replace known mojibake sequences.
pub fn fix_mojibake(text: &str) -> String {
    REPLACEMENTS
        .iter()
        .fold(text.to_string(), |acc, (from, to)| {
            if acc.contains(from) {
                acc.replace(from, to)
            } else {
                acc
            }
        })
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// Full pipeline: decode, fix mojibake, strip a code fence.
pub fn repair(raw: &[u8]) -> String {
    let text = fix_mojibake(&decode(raw));
    strip_code_fence(&text).to_string()
}
