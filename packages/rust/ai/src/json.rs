//! Lenient JSON handling for model output.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

/// Parse a JSON object out of model text: the whole text first, then the
/// outermost `{...}` span.
pub fn parse_json_from_text(text: &str) -> Option<Map<String, Value>> {
    static OBJECT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(map);
    }
    let span = OBJECT_RE.find(text)?;
    match serde_json::from_str::<Value>(span.as_str()) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "bedrock.response.json.extract.failed");
            None
        }
    }
}

/// A finite number, or a string that parses as one.
pub fn normalize_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

/// Clamp to the 0..=10 rating scale.
pub fn clamp_score(value: Option<f64>) -> Option<f64> {
    value.map(|v| v.clamp(0.0, 10.0))
}

/// A trimmed, non-empty string field.
pub fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A boolean field; `"true"`/`"false"` strings are accepted.
pub fn bool_field(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Non-empty trimmed strings from an array field.
pub fn string_list_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_and_wrapped_objects() {
        let map = parse_json_from_text(r#"{"name": "Rojo"}"#).unwrap();
        assert_eq!(map["name"], "Rojo");

        let wrapped = "Here is the JSON:\n```json\n{\"name\": \"Rojo\", \"heat\": 3}\n```\nDone.";
        let map = parse_json_from_text(wrapped).unwrap();
        assert_eq!(map["heat"], 3);

        assert!(parse_json_from_text("no json here").is_none());
        assert!(parse_json_from_text("{ broken").is_none());
        assert!(parse_json_from_text("[1, 2]").is_none());
    }

    #[test]
    fn number_normalization() {
        assert_eq!(normalize_number(Some(&json!(7))), Some(7.0));
        assert_eq!(normalize_number(Some(&json!("4.5"))), Some(4.5));
        assert_eq!(normalize_number(Some(&json!(" 3 "))), Some(3.0));
        assert_eq!(normalize_number(Some(&json!("hot"))), None);
        assert_eq!(normalize_number(Some(&json!(""))), None);
        assert_eq!(normalize_number(Some(&json!(null))), None);
        assert_eq!(normalize_number(None), None);
    }

    #[test]
    fn clamps_scores() {
        assert_eq!(clamp_score(Some(12.0)), Some(10.0));
        assert_eq!(clamp_score(Some(-1.0)), Some(0.0));
        assert_eq!(clamp_score(Some(6.5)), Some(6.5));
        assert_eq!(clamp_score(None), None);
    }

    #[test]
    fn field_accessors() {
        let map = parse_json_from_text(
            r#"{"name": "  Rojo ", "blank": " ", "relevant": "false", "ok": true, "keywords": ["smoky", " ", 3, "garlic"]}"#,
        )
        .unwrap();
        assert_eq!(string_field(&map, "name").as_deref(), Some("Rojo"));
        assert_eq!(string_field(&map, "blank"), None);
        assert_eq!(bool_field(&map, "relevant"), Some(false));
        assert_eq!(bool_field(&map, "ok"), Some(true));
        assert_eq!(bool_field(&map, "missing"), None);
        assert_eq!(string_list_field(&map, "keywords"), vec!["smoky", "garlic"]);
    }
}
