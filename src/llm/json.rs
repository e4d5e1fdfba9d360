// src/llm/json.rs

//! Best-effort decoding of JSON objects embedded in model output.
//!
//! Models wrap their answer in code fences, prepend reasoning, or append
//! commentary. The decoder looks inside the first fence, then over the
//! whole response, takes the first balanced `{...}` span and parses it
//! strictly. Anything else is "absent".

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use tracing::debug;

/// Decode the first JSON object found in `raw` into `T`.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    // A fence may hold reasoning rather than the answer.
    let Some(span) = first_object_span(strip_fences(raw)).or_else(|| first_object_span(raw)) else {
        debug!(raw_len = raw.len(), "No JSON object in response");
        return None;
    };
    match serde_json::from_str(span) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "Response JSON did not match the expected shape");
            None
        }
    }
}

/// Return the contents of the first ```` ``` ```` fence, or the trimmed input.
pub fn strip_fences(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw.trim();
    };
    let after = &raw[open + 3..];
    // language tag such as `json`
    let tag_len = after
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after.len());
    let body = &after[tag_len..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Locate the first balanced `{...}` span, ignoring braces inside strings.
pub fn first_object_span(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a decimal that may use a comma separator and embedded spaces
/// (`"1 234,5"`). Non-finite results are rejected.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

/// Accepts `3`, `3.5`, `"3,5"` or `null`. Unparseable text becomes `None`.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<NumberOrText>::deserialize(deserializer)? {
            Some(NumberOrText::Number(n)) => Some(n),
            Some(NumberOrText::Text(s)) => parse_decimal(&s),
            None => None,
        },
    )
}

/// Like [`lenient_f64`] but the value must be present and numeric.
pub fn required_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_f64(deserializer)?.ok_or_else(|| de::Error::custom("expected a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        compatible: bool,
    }

    #[test]
    fn test_plain_object() {
        let v: Verdict = decode_json(r#"{"compatible": true}"#).unwrap();
        assert!(v.compatible);
    }

    #[test]
    fn test_fenced_object() {
        let raw = "Here you go:\n```json\n{\"compatible\": false}\n```\nThanks";
        let v: Verdict = decode_json(raw).unwrap();
        assert!(!v.compatible);
    }

    #[test]
    fn test_object_after_unrelated_fence() {
        let raw = "Surface times duration:\n```\n6 m2 x 3 days\n```\nAnswer: {\"compatible\": true}";
        let v: Verdict = decode_json(raw).unwrap();
        assert!(v.compatible);
    }

    #[test]
    fn test_fenced_object_wins_over_later_object() {
        let raw = "```json\n{\"compatible\": false}\n```\nnot this: {\"compatible\": true}";
        let v: Verdict = decode_json(raw).unwrap();
        assert!(!v.compatible);
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "Reasoning: m² vs day are different. {\"compatible\": false} That's it {x}";
        assert_eq!(
            first_object_span(raw),
            Some("{\"compatible\": false}")
        );
        let v: Verdict = decode_json(raw).unwrap();
        assert!(!v.compatible);
    }

    #[test]
    fn test_braces_inside_strings() {
        let raw = r#"{"justification": "uses {braces} and \"quotes}\"", "n": 1} trailing }"#;
        let span = first_object_span(raw).unwrap();
        assert!(span.ends_with("\"n\": 1}"));
    }

    #[test]
    fn test_unbalanced_is_absent() {
        assert_eq!(first_object_span("{\"a\": {\"b\": 1}"), None);
        assert!(decode_json::<Verdict>("no json here").is_none());
    }

    #[test]
    fn test_wrong_shape_is_absent() {
        assert!(decode_json::<Verdict>(r#"{"compatible": "maybe"}"#).is_none());
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("0,03"), Some(0.03));
        assert_eq!(parse_decimal(" 1 234,5 "), Some(1234.5));
        assert_eq!(parse_decimal("12.75"), Some(12.75));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("n/a"), None);
        assert_eq!(parse_decimal("inf"), None);
    }

    #[derive(Debug, Deserialize)]
    struct Qty {
        #[serde(default, deserialize_with = "lenient_f64")]
        quantity: Option<f64>,
    }

    #[test]
    fn test_lenient_numbers() {
        let q: Qty = serde_json::from_str(r#"{"quantity": "2,5"}"#).unwrap();
        assert_eq!(q.quantity, Some(2.5));
        let q: Qty = serde_json::from_str(r#"{"quantity": 4}"#).unwrap();
        assert_eq!(q.quantity, Some(4.0));
        let q: Qty = serde_json::from_str(r#"{"quantity": null}"#).unwrap();
        assert_eq!(q.quantity, None);
        let q: Qty = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(q.quantity, None);
        let q: Qty = serde_json::from_str(r#"{"quantity": "a few"}"#).unwrap();
        assert_eq!(q.quantity, None);
    }
}
