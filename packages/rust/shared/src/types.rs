//! Core domain types for Scorchbook tasting records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TastingId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for tasting identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TastingId(pub Uuid);

impl TastingId {
    /// Generate a new time-sortable tasting identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TastingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TastingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TastingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ProcessingStatus
// ---------------------------------------------------------------------------

/// The last enrichment step a record completed (or `Error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    ImageExtracted,
    ImageEnriched,
    BackExtracted,
    VoiceTranscribed,
    VoiceExtracted,
    NotesFormatted,
    Complete,
    Error,
}

impl ProcessingStatus {
    /// Wire name, as stored and returned by the API.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ImageExtracted => "image_extracted",
            Self::ImageEnriched => "image_enriched",
            Self::BackExtracted => "back_extracted",
            Self::VoiceTranscribed => "voice_transcribed",
            Self::VoiceExtracted => "voice_extracted",
            Self::NotesFormatted => "notes_formatted",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TastingRecord
// ---------------------------------------------------------------------------

/// Nutrition panel read from the back label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionFacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_carbs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugars: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<String>,
}

impl NutritionFacts {
    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One reviewed product. Stored as JSON; indexed columns mirror the
/// filterable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TastingRecord {
    pub id: TastingId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_attention: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_reason: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub maker: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub heat_user: Option<f64>,
    #[serde(default)]
    pub heat_vendor: Option<f64>,
    #[serde(default)]
    pub tasting_notes_user: String,
    #[serde(default)]
    pub tasting_notes_vendor: String,
    #[serde(default)]
    pub product_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrition_facts: Option<NutritionFacts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl TastingRecord {
    /// A pending record with every text field blank. `date` defaults to the
    /// UTC day of `now`.
    pub fn pending(id: TastingId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            status: Some(ProcessingStatus::Pending),
            processing_error: None,
            needs_attention: None,
            attention_reason: None,
            name: String::new(),
            maker: String::new(),
            date: now.format("%Y-%m-%d").to_string(),
            score: None,
            style: String::new(),
            heat_user: None,
            heat_vendor: None,
            tasting_notes_user: String::new(),
            tasting_notes_vendor: String::new(),
            product_url: String::new(),
            image_url: None,
            image_key: None,
            back_image_url: None,
            back_image_key: None,
            nutrition_facts: None,
            ingredients: None,
            voice_key: None,
            voice_transcript: None,
            created_by: None,
        }
    }

    /// True when the record references at least one uploaded media object.
    pub fn has_media(&self) -> bool {
        self.image_key.is_some() || self.back_image_key.is_some() || self.voice_key.is_some()
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Body of `POST /tastings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTastingInput {
    pub name: Option<String>,
    pub maker: Option<String>,
    pub date: Option<String>,
    pub score: Option<f64>,
    pub style: Option<String>,
    pub heat_user: Option<f64>,
    pub heat_vendor: Option<f64>,
    pub tasting_notes_user: Option<String>,
    pub tasting_notes_vendor: Option<String>,
    pub product_url: Option<String>,
    pub image_base64: Option<String>,
    pub image_mime_type: Option<String>,
    pub back_image_base64: Option<String>,
    pub back_image_mime_type: Option<String>,
    pub voice_base64: Option<String>,
    pub voice_mime_type: Option<String>,
}

/// Query parameters of `GET /tastings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilters {
    /// Substring match on `name`.
    pub name: Option<String>,
    /// Substring match on `style`.
    pub style: Option<String>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    /// Lower bound on `heatUser`.
    pub min_heat: Option<f64>,
    /// Upper bound on `heatUser`.
    pub max_heat: Option<f64>,
    /// Exact match on `date`.
    pub date: Option<String>,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// Fields an enrichment step proposes for a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEnrichment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heat_vendor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasting_notes_vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heat_user: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasting_notes_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl AgentEnrichment {
    /// Names of the fields holding a non-blank value, in declaration order.
    pub fn filled_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if filled(&self.name) {
            fields.push("name");
        }
        if filled(&self.maker) {
            fields.push("maker");
        }
        if filled(&self.style) {
            fields.push("style");
        }
        if self.heat_vendor.is_some() {
            fields.push("heatVendor");
        }
        if filled(&self.tasting_notes_vendor) {
            fields.push("tastingNotesVendor");
        }
        if self.score.is_some() {
            fields.push("score");
        }
        if self.heat_user.is_some() {
            fields.push("heatUser");
        }
        if filled(&self.tasting_notes_user) {
            fields.push("tastingNotesUser");
        }
        if filled(&self.voice_transcript) {
            fields.push("voiceTranscript");
        }
        if filled(&self.product_url) {
            fields.push("productUrl");
        }
        fields
    }

    /// True when nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.filled_fields().is_empty()
    }
}

/// What the search step knows about the product before searching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchContext {
    pub name: Option<String>,
    pub maker: Option<String>,
    pub style: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasting_id_display_and_parse() {
        let id = TastingId::new();
        let s = id.to_string();
        let parsed: TastingId = s.parse().expect("parse TastingId");
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<TastingId>().is_err());
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&ProcessingStatus::ImageEnriched).unwrap();
        assert_eq!(json, "\"image_enriched\"");
        let parsed: ProcessingStatus = serde_json::from_str("\"notes_formatted\"").unwrap();
        assert_eq!(parsed, ProcessingStatus::NotesFormatted);
        assert_eq!(ProcessingStatus::VoiceExtracted.to_string(), "voice_extracted");
    }

    #[test]
    fn record_serializes_camel_case_and_omits_absent() {
        let now = Utc::now();
        let mut record = TastingRecord::pending(TastingId::new(), now);
        record.name = "Red Savina".into();
        record.heat_user = Some(7.0);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "Red Savina");
        assert_eq!(value["heatUser"], 7.0);
        assert_eq!(value["status"], "pending");
        assert!(value["score"].is_null());
        assert!(value.get("imageKey").is_none());
        assert!(value.get("processingError").is_none());
        assert_eq!(value["date"], now.format("%Y-%m-%d").to_string());

        let back: TastingRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn create_input_reads_camel_case() {
        let input: CreateTastingInput = serde_json::from_str(
            r#"{"name":"X","heatUser":3,"imageMimeType":"image/png","score":null}"#,
        )
        .unwrap();
        assert_eq!(input.name.as_deref(), Some("X"));
        assert_eq!(input.heat_user, Some(3.0));
        assert_eq!(input.image_mime_type.as_deref(), Some("image/png"));
        assert_eq!(input.score, None);
    }

    #[test]
    fn filled_fields_skip_blank_values() {
        let enrichment = AgentEnrichment {
            name: Some("Hellfire".into()),
            maker: Some("   ".into()),
            heat_vendor: Some(4.0),
            product_url: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(enrichment.filled_fields(), vec!["name", "heatVendor"]);
        assert!(!enrichment.is_empty());
        assert!(AgentEnrichment::default().is_empty());
    }

    #[test]
    fn has_media_checks_all_keys() {
        let mut record = TastingRecord::pending(TastingId::new(), Utc::now());
        assert!(!record.has_media());
        record.voice_key = Some("voice/a.webm".into());
        assert!(record.has_media());
    }
}
