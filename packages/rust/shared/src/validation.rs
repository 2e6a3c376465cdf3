//! Request validation and text sanitising for tasting input.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, ScorchbookError};
use crate::types::CreateTastingInput;

const MAX_TEXT_FIELD: usize = 1000;
const MAX_NOTES: usize = 4000;
const MAX_URL: usize = 2000;
const MAX_MEDIA_BASE64: usize = 10_000_000;
const MAX_MIME_TYPE: usize = 128;

/// Check a create request against the field constraints.
///
/// Returns the input with constrained string fields trimmed.
pub fn validate_create_tasting(input: CreateTastingInput) -> Result<CreateTastingInput> {
    let mut input = input;

    for (field, value) in [
        ("name", &mut input.name),
        ("maker", &mut input.maker),
        ("style", &mut input.style),
    ] {
        trim_within(field, value, 1, MAX_TEXT_FIELD)?;
    }
    trim_within("date", &mut input.date, 4, 32)?;
    trim_within("tastingNotesUser", &mut input.tasting_notes_user, 0, MAX_NOTES)?;
    trim_within("tastingNotesVendor", &mut input.tasting_notes_vendor, 0, MAX_NOTES)?;

    for (field, value) in [
        ("score", input.score),
        ("heatUser", input.heat_user),
        ("heatVendor", input.heat_vendor),
    ] {
        if let Some(v) = value {
            if !(0.0..=10.0).contains(&v) {
                return Err(ScorchbookError::validation(format!(
                    "{field} must be between 0 and 10"
                )));
            }
        }
    }

    if let Some(url) = input.product_url.as_deref() {
        if url.chars().count() > MAX_URL {
            return Err(ScorchbookError::validation(format!(
                "productUrl must be at most {MAX_URL} characters"
            )));
        }
        url::Url::parse(url)
            .map_err(|_| ScorchbookError::validation("productUrl must be a valid URL"))?;
    }

    for (field, value, max) in [
        ("imageBase64", &input.image_base64, MAX_MEDIA_BASE64),
        ("backImageBase64", &input.back_image_base64, MAX_MEDIA_BASE64),
        ("voiceBase64", &input.voice_base64, MAX_MEDIA_BASE64),
        ("imageMimeType", &input.image_mime_type, MAX_MIME_TYPE),
        ("backImageMimeType", &input.back_image_mime_type, MAX_MIME_TYPE),
        ("voiceMimeType", &input.voice_mime_type, MAX_MIME_TYPE),
    ] {
        if value.as_deref().is_some_and(|v| v.len() > max) {
            return Err(ScorchbookError::validation(format!(
                "{field} must be at most {max} characters"
            )));
        }
    }

    Ok(input)
}

fn trim_within(field: &str, value: &mut Option<String>, min: usize, max: usize) -> Result<()> {
    let Some(raw) = value.as_mut() else {
        return Ok(());
    };
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len < min {
        return Err(ScorchbookError::validation(format!(
            "{field} must be at least {min} characters"
        )));
    }
    if len > max {
        return Err(ScorchbookError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    *raw = trimmed.to_string();
    Ok(())
}

/// Strip all HTML from user text and trim. The bodies of `script` and
/// `style` elements are dropped along with their tags.
pub fn sanitize_text(value: &str) -> String {
    static NON_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<(script|style|textarea|noscript)\b[^>]*>.*?</(script|style|textarea|noscript)\s*>")
            .expect("valid regex")
    });
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)<!--.*?-->|</?[a-zA-Z!][^>]*>").expect("valid regex")
    });

    let without_blocks = NON_TEXT_RE.replace_all(value, "");
    TAG_RE.replace_all(&without_blocks, "").trim().to_string()
}

/// Sanitise an optional value; absent becomes the empty string.
pub fn sanitize_optional(value: Option<&str>) -> String {
    value.map(sanitize_text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_minimal_input() {
        let input = CreateTastingInput::default();
        assert!(validate_create_tasting(input).is_ok());
    }

    #[test]
    fn trims_text_fields() {
        let input = CreateTastingInput {
            name: Some("  Reaper Squeezins  ".into()),
            date: Some(" 2024-05-01 ".into()),
            ..Default::default()
        };
        let parsed = validate_create_tasting(input).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Reaper Squeezins"));
        assert_eq!(parsed.date.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn rejects_blank_name_and_short_date() {
        let input = CreateTastingInput {
            name: Some("   ".into()),
            ..Default::default()
        };
        let err = validate_create_tasting(input).unwrap_err();
        assert!(err.to_string().contains("name"));

        let input = CreateTastingInput {
            date: Some("24".into()),
            ..Default::default()
        };
        assert!(validate_create_tasting(input).is_err());
    }

    #[test]
    fn rejects_out_of_range_scores() {
        let input = CreateTastingInput {
            heat_user: Some(11.0),
            ..Default::default()
        };
        let err = validate_create_tasting(input).unwrap_err();
        assert!(err.public_message().contains("heatUser"));

        let input = CreateTastingInput {
            score: Some(0.0),
            heat_vendor: Some(10.0),
            ..Default::default()
        };
        assert!(validate_create_tasting(input).is_ok());
    }

    #[test]
    fn rejects_bad_urls_and_long_notes() {
        let input = CreateTastingInput {
            product_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(validate_create_tasting(input).is_err());

        let input = CreateTastingInput {
            tasting_notes_user: Some("x".repeat(4001)),
            ..Default::default()
        };
        assert!(validate_create_tasting(input).is_err());

        let input = CreateTastingInput {
            image_mime_type: Some("a".repeat(129)),
            ..Default::default()
        };
        assert!(validate_create_tasting(input).is_err());
    }

    #[test]
    fn sanitize_strips_tags() {
        assert_eq!(sanitize_text("  <b>Smoky</b> and <i>sweet</i> "), "Smoky and sweet");
        assert_eq!(sanitize_text("<script>alert(1)</script>Garlic"), "Garlic");
        assert_eq!(sanitize_text("heat < 5 and > 2"), "heat < 5 and > 2");
        assert_eq!(sanitize_optional(None), "");
    }
}
