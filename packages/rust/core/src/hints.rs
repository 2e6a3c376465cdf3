//! Regex hints pulled straight from page text, used to steer and backfill
//! the page extraction prompt.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::profile::EnrichmentProfile;
use crate::text::{char_window, collapse_whitespace, truncate_chars};

/// Phrases that usually sit next to vendor tasting copy.
const CONTENT_KEYWORDS: &[&str] = &[
    "tasting notes",
    "flavor",
    "flavour",
    "notes",
    "taste",
    "aroma",
    "pairing",
    "finish",
    "description",
    "ingredients",
    "heat level",
    "spice level",
    "scoville",
];

/// Content sent to the model per page.
pub const MAX_LLM_CONTENT_CHARS: usize = 4_000;

/// Heat level and vendor notes spotted in page text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_vendor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasting_notes_vendor: Option<String>,
}

pub fn extract_vendor_hints(content: &str, profile: &EnrichmentProfile) -> VendorHints {
    VendorHints {
        heat_vendor: extract_heat_from_text(content, profile),
        tasting_notes_vendor: extract_vendor_notes_from_text(content),
    }
}

/// Heat level from page text, tried in order: a `heat 3/5` style ratio
/// (scaled to five), a bare `heat: 4`, a heat word (`spice level: medium`),
/// then a Scoville rating bucketed into 1..=5.
pub fn extract_heat_from_text(content: &str, profile: &EnrichmentProfile) -> Option<f64> {
    static RATIO_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?:heat|spice)\s*(?:level)?\s*[:\-]?\s*(\d+(?:\.\d+)?)\s*/\s*(\d+)")
            .expect("valid regex")
    });
    static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?:heat|spice)\s*(?:level)?\s*[:\-]?\s*(\d+(?:\.\d+)?)").expect("valid regex")
    });
    static WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?:heat|spice)\s*(?:level)?\s*[:\-]?\s*([a-z\- ]{3,20})").expect("valid regex")
    });
    static SCOVILLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(\d{1,3}(?:,\d{3})+|\d{4,})\s*(?:shu|scoville)").expect("valid regex")
    });

    let lower = content.to_lowercase();

    if let Some(caps) = RATIO_RE.captures(&lower) {
        let value: Option<f64> = caps[1].parse().ok();
        let denom: Option<f64> = caps[2].parse().ok();
        if let (Some(value), Some(denom)) = (value, denom.filter(|d| *d > 0.0)) {
            let scaled = if denom == 5.0 { value } else { value / denom * 5.0 };
            return Some(((scaled * 10.0).round() / 10.0).clamp(0.0, 10.0));
        }
    }

    if let Some(value) = NUMBER_RE
        .captures(&lower)
        .and_then(|caps| caps[1].parse::<f64>().ok())
    {
        return Some(value.clamp(0.0, 10.0));
    }

    if let Some(caps) = WORD_RE.captures(&lower) {
        let word = collapse_whitespace(&caps[1]);
        if let Some(level) = profile.heat_word(&word) {
            return Some(level);
        }
    }

    let shu: f64 = SCOVILLE_RE.captures(&lower)?[1].replace(',', "").parse().ok()?;
    Some(if shu >= 100_000.0 {
        5.0
    } else if shu >= 20_000.0 {
        4.0
    } else if shu >= 5_000.0 {
        3.0
    } else if shu >= 1_000.0 {
        2.0
    } else {
        1.0
    })
}

/// Vendor tasting copy: text around the first few notes keywords, or the
/// page opening when none appear.
pub fn extract_vendor_notes_from_text(content: &str) -> Option<String> {
    let cleaned = collapse_whitespace(content);
    if cleaned.is_empty() {
        return None;
    }
    let lower = cleaned.to_ascii_lowercase();
    let mut segments: Vec<&str> = Vec::new();
    for keyword in CONTENT_KEYWORDS.iter().filter(|k| k.len() >= 4) {
        if let Some(idx) = lower.find(keyword) {
            segments.push(char_window(&cleaned, idx, 120, 220));
        }
        if segments.len() >= 4 {
            break;
        }
    }

    if segments.is_empty() {
        let fallback = truncate_chars(&cleaned, 280);
        return (fallback.chars().count() > 40).then(|| fallback.to_string());
    }
    let combined = collapse_whitespace(&segments.join(" "));
    if combined.chars().count() < 40 {
        return None;
    }
    Some(truncate_chars(&combined, 400).to_string())
}

/// The parts of a page most likely to describe the product, capped at
/// [`MAX_LLM_CONTENT_CHARS`]. Falls back to the page opening.
pub fn pick_relevant_content(content: &str) -> String {
    let cleaned = collapse_whitespace(content);
    let lower = cleaned.to_ascii_lowercase();
    let mut windows: Vec<&str> = Vec::new();
    for keyword in CONTENT_KEYWORDS {
        if let Some(idx) = lower.find(keyword) {
            windows.push(char_window(&cleaned, idx, 180, 220));
        }
        if windows.len() >= 6 {
            break;
        }
    }
    let combined = collapse_whitespace(&windows.join(" "));
    let chosen = if combined.chars().count() > 40 {
        combined.as_str()
    } else {
        cleaned.as_str()
    };
    truncate_chars(chosen, MAX_LLM_CONTENT_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heat(text: &str) -> Option<f64> {
        extract_heat_from_text(text, &EnrichmentProfile::hot_sauce())
    }

    #[test]
    fn heat_ratio_scales_to_five() {
        assert_eq!(heat("Heat Level: 3/5"), Some(3.0));
        assert_eq!(heat("heat 7 / 10"), Some(3.5));
        assert_eq!(heat("Spice level - 2/3"), Some(3.3));
        assert_eq!(heat("heat 4/0 then heat 2"), Some(4.0));
    }

    #[test]
    fn heat_number_word_and_scoville() {
        assert_eq!(heat("Heat: 4"), Some(4.0));
        assert_eq!(heat("heat 14"), Some(10.0));
        assert_eq!(heat("Spice level: Medium"), Some(3.0));
        assert_eq!(heat("heat level: extra hot"), Some(5.0));
        assert_eq!(heat("heat: lava"), None);
        assert_eq!(heat("Clocks in at 150,000 SHU"), Some(5.0));
        assert_eq!(heat("about 2500 scoville units"), Some(2.0));
        assert_eq!(heat("8,000 shu"), Some(3.0));
        assert_eq!(heat("tangy and bright"), None);
    }

    #[test]
    fn vendor_notes_windows() {
        let text = format!(
            "{} Tasting notes: roasted garlic, bright vinegar and a slow reaper burn. {}",
            "Intro copy. ".repeat(20),
            "Shipping info. ".repeat(30)
        );
        let notes = extract_vendor_notes_from_text(&text).unwrap();
        assert!(notes.contains("roasted garlic"));
        assert!(notes.chars().count() <= 400);
    }

    #[test]
    fn vendor_notes_fallback_and_minimums() {
        let plain = "A small batch sauce made in Oregon from fresh peppers and garlic.";
        assert_eq!(extract_vendor_notes_from_text(plain).as_deref(), Some(plain));
        assert_eq!(extract_vendor_notes_from_text("Too short."), None);
        assert_eq!(extract_vendor_notes_from_text("Notes: ok"), None);
        assert_eq!(extract_vendor_notes_from_text("   "), None);
    }

    #[test]
    fn relevant_content_prefers_keyword_windows() {
        let text = format!(
            "{} Flavor: sweet mango with a habanero kick and tropical finish. {}",
            "nav ".repeat(200),
            "footer ".repeat(200)
        );
        let picked = pick_relevant_content(&text);
        assert!(picked.contains("sweet mango"));
        assert!(picked.chars().count() < text.chars().count());

        let long = "x".repeat(5_000);
        assert_eq!(pick_relevant_content(&long).len(), MAX_LLM_CONTENT_CHARS);
    }

    #[test]
    fn hints_serialize_camel_case() {
        let hints = extract_vendor_hints("Heat: 3. Flavor is a lovely smoky chipotle with a long lingering finish.", &EnrichmentProfile::hot_sauce());
        let json = serde_json::to_value(&hints).unwrap();
        assert_eq!(json["heatVendor"], 3.0);
        assert!(json["tastingNotesVendor"].as_str().unwrap().contains("smoky chipotle"));
    }
}
