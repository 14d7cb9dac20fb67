//! Best-effort coercion of raw model text into JSON values.
//!
//! Models asked for JSON routinely answer with single quotes, bare keys or
//! several objects in a row. [`parse_structured`] tries progressively looser
//! readings and never fails: the caller gets a value or `None`, and judging
//! whether the value has the right shape is the caller's job.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// A bare word immediately followed by a colon, i.e. an unquoted object key.
static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)(\s*:)").expect("valid regex"));

/// Parse `text` as a JSON object or array, tolerating common model quirks.
///
/// Attempts, in order:
/// 1. strict JSON
/// 2. normalized text (trimmed, single quotes swapped for double quotes,
///    bare keys quoted)
/// 3. the normalized text wrapped in `[...]`, unwrapping a single element
///
/// Blank input reads as `[]`, an empty array.
pub fn parse_structured(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    let normalized = normalize(text);
    if let Ok(value) = serde_json::from_str::<Value>(&normalized) {
        debug!("parsed model output after normalization");
        return Some(value);
    }

    match serde_json::from_str::<Value>(&format!("[{normalized}]")) {
        Ok(Value::Array(mut items)) if items.len() == 1 => items.pop(),
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, preview = %preview(text), "failed to parse model output as JSON");
            None
        }
    }
}

/// Return the body of the first markdown code fence, or the trimmed input.
///
/// A fence may carry a language tag (```` ```json ````, ```` ```html ````).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();

    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    let body_start = after_fence
        .find('\n')
        .filter(|&newline| {
            after_fence[..newline]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
        .map(|newline| newline + 1)
        .unwrap_or(0);
    let body = &after_fence[body_start..];

    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => trimmed,
    }
}

fn normalize(text: &str) -> String {
    let swapped = text.trim().replace('\'', "\"");
    BARE_KEY.replace_all(&swapped, "\"${1}\"${2}").into_owned()
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_matches_canonical_parse() {
        for text in [
            r#"{"name": "Acme", "id": 5}"#,
            r#"[1, 2, {"nested": [true, null]}]"#,
            r#"{"address": {"city": "Köln", "postal_code": "50667"}, "wault": 4.5}"#,
            "42",
        ] {
            let expected: Value = serde_json::from_str(text).unwrap();
            assert_eq!(parse_structured(text), Some(expected), "input: {text}");
        }
    }

    #[test]
    fn recovers_single_quotes_and_bare_keys() {
        assert_eq!(
            parse_structured("{name: 'Acme', id: 5}"),
            Some(json!({"name": "Acme", "id": 5}))
        );
    }

    #[test]
    fn recovers_nested_bare_keys() {
        let text = "  {address: {city: 'Berlin', population: 3700000}, purchase_price: '2.100.000 €'}\n";
        assert_eq!(
            parse_structured(text),
            Some(json!({
                "address": {"city": "Berlin", "population": 3700000},
                "purchase_price": "2.100.000 €"
            }))
        );
    }

    #[test]
    fn wraps_object_sequences_into_array() {
        assert_eq!(
            parse_structured(r#"{"a": 1}, {"b": 2}"#),
            Some(json!([{"a": 1}, {"b": 2}]))
        );
    }

    #[test]
    fn garble_returns_none() {
        assert_eq!(parse_structured("Sorry, I cannot help with that."), None);
        assert_eq!(parse_structured("{{{"), None);
    }

    #[test]
    fn blank_input_reads_as_empty_array() {
        assert_eq!(parse_structured(""), Some(json!([])));
        assert_eq!(parse_structured("  \n "), Some(json!([])));
    }

    #[test]
    fn strip_fences_with_language_tag() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nAnything else?";
        assert_eq!(strip_code_fences(text), "{\"a\": 1}");

        let html = "```html\n<div class=\"card\">Hallo</div>\n```";
        assert_eq!(strip_code_fences(html), "<div class=\"card\">Hallo</div>");
    }

    #[test]
    fn strip_fences_without_fence_or_close() {
        assert_eq!(strip_code_fences("  <p>plain</p> "), "<p>plain</p>");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}"), "```json\n{\"a\": 1}");
        assert_eq!(strip_code_fences("```{\"a\": 1}```"), "{\"a\": 1}");
    }
}
