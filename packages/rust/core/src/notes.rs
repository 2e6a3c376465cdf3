//! Turning a rambling voice transcript into short tasting notes.

use std::sync::LazyLock;

use regex::Regex;
use scorchbook_ai::parse_json_from_text;
use scorchbook_shared::Result;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::extraction::Extractor;
use crate::text::truncate_chars;

const NOTES_INSTRUCTIONS: &str = "Rewrite this transcript into clean tasting notes. Output JSON only with key: tasting_notes_user as a single string. Use short labeled lines if relevant: Flavor, Aroma, Texture, Heat, Pairings, Finish. Remove numeric ratings or scores; do not include numbers like 8/10. Remove filler words like um/uh. Keep descriptive text even if informal. If the transcript contains no tasting notes, return an empty string. Do not return nested objects or arrays.";

/// Shorter transcripts are not worth keeping as fallback notes.
const MIN_FALLBACK_CHARS: usize = 12;
const MAX_FALLBACK_CHARS: usize = 1_200;

/// Label order for notes that arrive as an object.
const PREFERRED_LABELS: &[&str] = &["flavor", "aroma", "texture", "heat", "pairings", "finish"];

/// How the notes were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotesSource {
    Llm,
    /// The transcript itself, lightly trimmed.
    Fallback,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotesResult {
    pub notes: Option<String>,
    pub source: NotesSource,
}

impl NotesResult {
    fn none() -> Self {
        Self {
            notes: None,
            source: NotesSource::None,
        }
    }
}

impl Extractor {
    /// Rewrite a transcript into tasting notes. An empty model answer is
    /// retried once before falling back to the transcript.
    #[instrument(skip_all, fields(transcript_chars = transcript.len()))]
    pub async fn format_tasting_notes(&self, transcript: &str) -> Result<NotesResult> {
        let trimmed = transcript.trim();
        if trimmed.is_empty() {
            return Ok(NotesResult::none());
        }

        let mut notes = self.request_notes(trimmed).await?;
        if notes.is_empty() {
            info!("agent.notes.retry");
            notes = self.request_notes(trimmed).await?;
        }
        if !notes.is_empty() {
            return Ok(NotesResult {
                notes: Some(notes),
                source: NotesSource::Llm,
            });
        }

        match fallback_notes(trimmed) {
            Some(fallback) => {
                warn!(chars = fallback.chars().count(), "agent.notes.llm_empty");
                Ok(NotesResult {
                    notes: Some(fallback),
                    source: NotesSource::Fallback,
                })
            }
            None => Ok(NotesResult::none()),
        }
    }

    async fn request_notes(&self, transcript: &str) -> Result<String> {
        let text = self.invoke_text(NOTES_INSTRUCTIONS, transcript).await?;
        let notes = parse_json_from_text(&text)
            .and_then(|parsed| parsed.get("tasting_notes_user").map(notes_to_string))
            .unwrap_or_default();
        Ok(strip_ratings_from_notes(&notes))
    }
}

/// The transcript itself when it is long enough to be useful.
pub fn fallback_notes(transcript: &str) -> Option<String> {
    let trimmed = transcript.trim();
    if trimmed.chars().count() < MIN_FALLBACK_CHARS {
        return None;
    }
    Some(truncate_chars(trimmed, MAX_FALLBACK_CHARS).to_string())
}

/// Remove spoken ratings ("8/10", "score: 7", "heat level 4") and filler
/// words, then tidy whitespace line by line.
pub fn strip_ratings_from_notes(notes: &str) -> String {
    static RATING_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        [
            r"(?i)\b\d+\s*/\s*10\b",
            r"(?i)\b\d+\s*/\s*5\b",
            r"(?i)\b\d+\s*out of\s*10\b",
            r"(?i)\b(score|rating)\s*[:\-]?\s*\d+(\.\d+)?\b",
            r"(?i)\b(heat|heat level|spice level)\s*[:\-]?\s*\d+(\.\d+)?\b",
        ]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
        .collect()
    });
    static FILLER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\b(uh|um|erm|er|hmm+)\b").expect("valid regex"));
    static NEWLINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n+").expect("valid regex"));
    static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid regex"));
    static SPACE_DOT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\.").expect("valid regex"));

    let mut cleaned = notes.to_string();
    for re in RATING_RES.iter() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned = FILLER_RE.replace_all(&cleaned, " ").into_owned();

    let lines: Vec<&str> = NEWLINES_RE
        .split(&cleaned)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let joined = lines.join("\n");
    let joined = SPACES_RE.replace_all(&joined, " ");
    SPACE_DOT_RE.replace_all(&joined, ".").trim().to_string()
}

/// Display label for a notes key.
pub fn format_notes_label(key: &str) -> String {
    static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_-]+").expect("valid regex"));

    let normalized = key.trim().to_lowercase();
    let known = match normalized.as_str() {
        "flavor" | "flavour" => Some("Flavor"),
        "aroma" => Some("Aroma"),
        "texture" => Some("Texture"),
        "heat" | "heat level" | "spice" | "spice level" => Some("Heat"),
        "pairings" | "pairing" => Some("Pairings"),
        "finish" => Some("Finish"),
        "description" => Some("Description"),
        _ => None,
    };
    if let Some(label) = known {
        return label.to_string();
    }

    let spaced = SEPARATOR_RE.replace_all(key.trim(), " ");
    let label = spaced
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ");
    if label.is_empty() { "Note".to_string() } else { label }
}

/// Flatten whatever shape the model returned for the notes into text.
/// Objects become `Label: value` lines in a fixed label order.
pub fn notes_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &str)> = map
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|v| (key, v)))
                .filter(|(_, v)| !v.trim().is_empty())
                .collect();
            let rank = |key: &str| {
                let lower = key.trim().to_lowercase();
                PREFERRED_LABELS
                    .iter()
                    .position(|label| *label == lower)
                    .unwrap_or(PREFERRED_LABELS.len())
            };
            entries.sort_by_key(|(key, _)| rank(key));
            entries
                .into_iter()
                .map(|(key, value)| format!("{}: {}", format_notes_label(key), value.trim()))
                .collect::<Vec<_>>()
                .join("\n")
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::profile::EnrichmentProfile;
    use crate::testing::FakeModel;

    #[test]
    fn strips_ratings_and_filler() {
        let cleaned = strip_ratings_from_notes("Um really garlicky 8/10 .\n\n  uh heat level 4 but pleasant\nscore: 7.5");
        assert_eq!(cleaned, "really garlicky.\nbut pleasant");

        assert_eq!(strip_ratings_from_notes("Fruity 4 / 5 and 9 out of 10 tangy"), "Fruity and tangy");
        assert_eq!(strip_ratings_from_notes("Hmmm smoky"), "smoky");
    }

    #[test]
    fn labels_known_and_unknown_keys() {
        assert_eq!(format_notes_label("flavour"), "Flavor");
        assert_eq!(format_notes_label(" Spice Level "), "Heat");
        assert_eq!(format_notes_label("after_taste"), "After Taste");
        assert_eq!(format_notes_label("mouth-feel--notes"), "Mouth Feel Notes");
        assert_eq!(format_notes_label("__"), "Note");
    }

    #[test]
    fn notes_from_shapes() {
        assert_eq!(notes_to_string(&json!("plain")), "plain");
        assert_eq!(notes_to_string(&json!(["one", " ", 3, "two"])), "one\ntwo");
        let object = json!({"finish": " long ", "extra_bit": "odd", "flavor": "garlic", "aroma": ""});
        assert_eq!(notes_to_string(&object), "Flavor: garlic\nFinish: long\nExtra Bit: odd");
        assert_eq!(notes_to_string(&json!(null)), "");
    }

    #[test]
    fn fallback_needs_enough_text() {
        assert_eq!(fallback_notes("  too short "), None);
        assert_eq!(fallback_notes("  quite garlicky sauce  ").as_deref(), Some("quite garlicky sauce"));
        assert_eq!(fallback_notes(&"a".repeat(2_000)).unwrap().len(), 1_200);
    }

    fn extractor(model: FakeModel) -> (Extractor, Arc<FakeModel>) {
        let model = Arc::new(model);
        (Extractor::new(model.clone(), EnrichmentProfile::hot_sauce()), model)
    }

    #[tokio::test]
    async fn llm_notes_are_cleaned() {
        let (extractor, _) = extractor(FakeModel::new().reply(
            "clean tasting notes",
            r#"{"tasting_notes_user": {"heat": "slow build 7/10", "flavor": "roasted garlic"}}"#,
        ));
        let result = extractor.format_tasting_notes("um roasted garlic, slow build, seven out of ten").await.unwrap();
        assert_eq!(result.source, NotesSource::Llm);
        assert_eq!(result.notes.as_deref(), Some("Flavor: roasted garlic\nHeat: slow build"));
    }

    #[tokio::test]
    async fn empty_answer_retries_then_falls_back() {
        let (extractor, model) = extractor(FakeModel::new().reply("clean tasting notes", r#"{"tasting_notes_user": ""}"#));
        let result = extractor.format_tasting_notes("really nice garlic flavor").await.unwrap();
        assert_eq!(result.source, NotesSource::Fallback);
        assert_eq!(result.notes.as_deref(), Some("really nice garlic flavor"));
        assert_eq!(model.calls(), 2);

        let short = extractor.format_tasting_notes("meh").await.unwrap();
        assert_eq!(short, NotesResult::none());
    }

    #[tokio::test]
    async fn blank_transcript_skips_model() {
        let (extractor, model) = extractor(FakeModel::new());
        let result = extractor.format_tasting_notes("   ").await.unwrap();
        assert_eq!(result.source, NotesSource::None);
        assert_eq!(model.calls(), 0);
    }
}
