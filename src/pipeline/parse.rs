//! Reply parsing: deterministic cleanup of model output, then typed decoding.
//!
//! Even when told "Return ONLY valid JSON. No markdown.", models occasionally
//! wrap the object in a ` ```json ` fence, prefix it with a sentence, or emit a
//! BOM. The cleanup rules below undo those quirks without touching content;
//! what remains is decoded into the stage's record type. Failures are
//! reported as [`StageError`] so the caller can substitute a fallback.
//!
//! ## Rule Order
//!
//! Invisible characters go first so the fence regex sees a clean first line;
//! line endings are normalised before fences are matched.

use crate::error::StageError;
use crate::pipeline::Stage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Apply all cleanup rules to a raw model reply.
///
/// Rules (applied in order):
/// 1. Strip invisible Unicode (BOM, zero-width spaces)
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip an outer code fence (` ```json `, ` ``` `)
/// 4. Trim surrounding whitespace
pub fn clean_reply(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = normalise_line_endings(&s);
    let s = strip_code_fences(&s);
    s.trim().to_string()
}

/// Decode a model reply into `T`.
///
/// The cleaned reply is parsed as a whole first; failing that, the widest
/// `{ … }` span is tried, which rescues replies with chatter around the object.
///
/// # Errors
/// * [`StageError::MalformedJson`]: no JSON object could be located
/// * [`StageError::SchemaViolation`]: a JSON object was found but does not
///   deserialise into `T`
pub fn parse_reply<T: DeserializeOwned>(stage: Stage, raw: &str) -> Result<T, StageError> {
    let value = locate_json_object(&clean_reply(raw)).ok_or_else(|| StageError::MalformedJson {
        stage,
        detail: preview(raw),
    })?;

    serde_json::from_value(value).map_err(|e| StageError::SchemaViolation {
        stage,
        problems: vec![e.to_string()],
    })
}

/// Find a JSON object in already-cleaned text.
fn locate_json_object(text: &str) -> Option<Value> {
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start >= end {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

/// First 80 characters of a reply, for error messages.
fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "empty reply".to_string();
    }
    let head: String = trimmed.chars().take(80).collect();
    if head.len() < trimmed.len() {
        format!("{head}\u{2026}")
    } else {
        head
    }
}

// ── Rule 1: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
