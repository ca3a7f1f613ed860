//! Tolerant JSON extraction from LLM text output (§9): strips markdown
//! fences, extracts the first balanced top-level object or array while
//! respecting string literals, repairs trailing commas / unbalanced braces /
//! smart quotes, then hands the result to `serde_json` for structured
//! validation.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonRepairError {
    #[error("response did not contain valid JSON")]
    InvalidJson,
    #[error("repaired JSON failed schema validation: {0}")]
    SchemaMismatch(String),
}

/// Strips a leading ```json / ``` fence and trailing ``` fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let after_open = after_open.strip_prefix("json").unwrap_or(after_open);
    let after_open = after_open.trim_start_matches(['\n', '\r']);
    match after_open.rfind("```") {
        Some(close_index) => after_open[..close_index].trim(),
        None => after_open.trim(),
    }
}

/// Replaces curly "smart quotes" with their straight ASCII equivalents.
fn normalize_smart_quotes(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// Scans for the first balanced top-level `{}` or `[]`, respecting string
/// literals (so a brace character inside a quoted string never terminates
/// the scan early). Returns the slice of `text` spanning the match.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start_index = None;
    let mut opener = b'{';
    let mut closer = b'}';
    for (index, byte) in bytes.iter().enumerate() {
        if *byte == b'{' || *byte == b'[' {
            start_index = Some(index);
            opener = *byte;
            closer = if opener == b'{' { b'}' } else { b']' };
            break;
        }
    }
    let start_index = start_index?;

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in bytes[start_index..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match *byte {
            b'"' => in_string = true,
            b if b == opener => depth += 1,
            b if b == closer => {
                depth -= 1;
                if depth == 0 {
                    let end_index = start_index + offset + 1;
                    return std::str::from_utf8(&bytes[start_index..end_index]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Applies targeted repairs: trailing commas before `}`/`]`, unbalanced
/// (unclosed) braces/brackets closed with a bounded count, smart quotes.
pub fn repair_json(text: &str) -> String {
    let normalized = normalize_smart_quotes(text);
    let without_trailing_commas = remove_trailing_commas(&normalized);
    close_unbalanced_braces(&without_trailing_commas)
}

fn remove_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut index = 0;
    while index < chars.len() {
        let ch = chars[index];
        if ch == ',' {
            let mut lookahead = index + 1;
            while lookahead < chars.len() && chars[lookahead].is_whitespace() {
                lookahead += 1;
            }
            if lookahead < chars.len() && (chars[lookahead] == '}' || chars[lookahead] == ']') {
                index += 1;
                continue;
            }
        }
        result.push(ch);
        index += 1;
    }
    result
}

/// Appends closers for any opener left unmatched at end-of-string, skipping
/// openers/closers inside string literals. Bounded by the actual open count
/// so this can never loop or over-close.
fn close_unbalanced_braces(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    let mut repaired = text.to_string();
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Full pipeline: fence-strip, extract, repair, then `serde_json` parse
/// into `T`. Returns `InvalidJson` only when no JSON-shaped substring could
/// be located at all — a present-but-malformed value that fails repair
/// surfaces as `SchemaMismatch` once `serde_json` reports why.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T, JsonRepairError> {
    let fence_stripped = strip_code_fence(raw);

    if let Ok(value) = serde_json::from_str::<T>(fence_stripped) {
        return Ok(value);
    }

    let candidate = extract_json_object(fence_stripped).ok_or(JsonRepairError::InvalidJson)?;
    if let Ok(value) = serde_json::from_str::<T>(candidate) {
        return Ok(value);
    }

    let repaired = repair_json(candidate);
    serde_json::from_str::<T>(&repaired).map_err(|err| JsonRepairError::SchemaMismatch(err.to_string()))
}
