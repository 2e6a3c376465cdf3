//! The processing state machine: take a freshly created tasting through
//! label extraction, web search, back label, and voice note steps,
//! persisting the status after each one.

use std::sync::Arc;

use chrono::Utc;
use scorchbook_ai::Transcriber;
use scorchbook_search::SearchProvider;
use scorchbook_shared::{
    AgentEnrichment, ProcessingStatus, Result, SearchContext, TastingId, TastingRecord,
};
use scorchbook_storage::{MediaStore, Storage};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::extraction::Extractor;
use crate::notes::NotesSource;
use crate::pages::PageSource;
use crate::search_enrichment::SearchEnricher;
use crate::text::non_blank;

const NOTES_FALLBACK_REASON: &str = "Notes fallback used";
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
const DEFAULT_VOICE_MIME: &str = "audio/webm";

/// One unit of background work: which media to read for which record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessJob {
    pub record_id: TastingId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_image_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_mime_type: Option<String>,
    /// Voice-derived fields replace existing values instead of filling gaps.
    #[serde(default)]
    pub force_voice: bool,
}

// ---------------------------------------------------------------------------
// Record updates
// ---------------------------------------------------------------------------

/// Record fields an enrichment can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Name,
    Maker,
    Style,
    HeatVendor,
    TastingNotesVendor,
    ProductUrl,
    Score,
    HeatUser,
    TastingNotesUser,
    VoiceTranscript,
}

/// Copy enrichment values onto the record. A field is written when it is
/// listed in `overwrite` or currently blank; absent or blank candidates
/// are never written.
pub fn apply_enrichment(record: &mut TastingRecord, enrichment: &AgentEnrichment, overwrite: &[RecordField]) {
    fn set_text(current: &mut String, candidate: Option<&str>, force: bool) {
        if let Some(value) = non_blank(candidate) {
            if force || current.trim().is_empty() {
                *current = value.to_string();
            }
        }
    }
    fn set_number(current: &mut Option<f64>, candidate: Option<f64>, force: bool) {
        if candidate.is_some() && (force || current.is_none()) {
            *current = candidate;
        }
    }
    let force = |field| overwrite.contains(&field);

    set_text(&mut record.name, enrichment.name.as_deref(), force(RecordField::Name));
    set_text(&mut record.maker, enrichment.maker.as_deref(), force(RecordField::Maker));
    set_text(&mut record.style, enrichment.style.as_deref(), force(RecordField::Style));
    set_number(&mut record.heat_vendor, enrichment.heat_vendor, force(RecordField::HeatVendor));
    set_text(
        &mut record.tasting_notes_vendor,
        enrichment.tasting_notes_vendor.as_deref(),
        force(RecordField::TastingNotesVendor),
    );
    set_text(&mut record.product_url, enrichment.product_url.as_deref(), force(RecordField::ProductUrl));
    set_number(&mut record.score, enrichment.score, force(RecordField::Score));
    set_number(&mut record.heat_user, enrichment.heat_user, force(RecordField::HeatUser));
    set_text(
        &mut record.tasting_notes_user,
        enrichment.tasting_notes_user.as_deref(),
        force(RecordField::TastingNotesUser),
    );

    if let Some(transcript) = non_blank(enrichment.voice_transcript.as_deref()) {
        let blank = non_blank(record.voice_transcript.as_deref()).is_none();
        if blank || force(RecordField::VoiceTranscript) {
            record.voice_transcript = Some(transcript.to_string());
        }
    }
}

/// Set the status, stamp `updated_at`, and persist. `error` keeps or sets a
/// processing error; every other status clears it.
pub async fn update_record_status(
    storage: &Storage,
    record: &mut TastingRecord,
    status: ProcessingStatus,
    processing_error: Option<&str>,
) -> Result<()> {
    record.status = Some(status);
    record.updated_at = Utc::now();
    record.processing_error = if status == ProcessingStatus::Error {
        Some(
            processing_error
                .map(str::to_string)
                .or_else(|| record.processing_error.take())
                .unwrap_or_else(|| "Unknown processing error".to_string()),
        )
    } else {
        None
    };
    storage.put_tasting(record).await?;
    info!(record_id = %record.id, status = %status, "tasting.status.updated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Notified as each processing step is persisted.
pub trait ProcessProgress: Send + Sync {
    fn step(&self, status: ProcessingStatus);
}

/// No-op progress reporter for background workers and tests.
pub struct SilentProgress;

impl ProcessProgress for SilentProgress {
    fn step(&self, _status: ProcessingStatus) {}
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Everything a processing run talks to.
#[derive(Clone)]
pub struct TastingProcessor {
    storage: Arc<Storage>,
    media: MediaStore,
    extractor: Extractor,
    search: Arc<dyn SearchProvider>,
    pages: Arc<dyn PageSource>,
    transcriber: Arc<dyn Transcriber>,
}

impl TastingProcessor {
    pub fn new(
        storage: Arc<Storage>,
        media: MediaStore,
        extractor: Extractor,
        search: Arc<dyn SearchProvider>,
        pages: Arc<dyn PageSource>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            storage,
            media,
            extractor,
            search,
            pages,
            transcriber,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Search enrichment over this processor's backends.
    pub fn search_enricher(&self) -> SearchEnricher<'_> {
        SearchEnricher::new(self.search.as_ref(), self.pages.as_ref(), &self.extractor)
    }

    /// Run every step the job has media for. A failing step marks the
    /// record `error` with the failure message and returns the error.
    #[instrument(skip_all, fields(record_id = %job.record_id))]
    pub async fn process_tasting(&self, job: &ProcessJob, progress: &dyn ProcessProgress) -> Result<()> {
        let Some(mut record) = self.storage.get_tasting(&job.record_id).await? else {
            warn!(record_id = %job.record_id, "agent.process.missing_record");
            return Ok(());
        };

        if let Err(e) = self.run_steps(job, &mut record, progress).await {
            let message = e.to_string();
            error!(record_id = %job.record_id, error = %message, "agent.process.failed");
            self.advance(&mut record, ProcessingStatus::Error, Some(&message), progress)
                .await?;
            return Err(e);
        }
        Ok(())
    }

    async fn run_steps(
        &self,
        job: &ProcessJob,
        record: &mut TastingRecord,
        progress: &dyn ProcessProgress,
    ) -> Result<()> {
        if let Some(key) = job.image_key.as_deref() {
            self.process_front_image(job, key, record, progress).await?;
        }
        if let Some(key) = job.back_image_key.as_deref() {
            self.process_back_image(job, key, record, progress).await?;
        }
        if let Some(key) = job.voice_key.as_deref() {
            self.process_voice(job, key, record, progress).await?;
        }
        self.advance(record, ProcessingStatus::Complete, None, progress).await
    }

    async fn process_front_image(
        &self,
        job: &ProcessJob,
        key: &str,
        record: &mut TastingRecord,
        progress: &dyn ProcessProgress,
    ) -> Result<()> {
        let media = self.media.download(key).await?;
        let mime_type = media
            .content_type
            .as_deref()
            .or(job.image_mime_type.as_deref())
            .unwrap_or(DEFAULT_IMAGE_MIME);
        let extraction = self
            .extractor
            .run_image_extraction(&media.to_base64(), mime_type)
            .await?;
        apply_enrichment(record, &extraction.fields, &[]);
        self.advance(record, ProcessingStatus::ImageExtracted, None, progress)
            .await?;

        let pick = |current: &str, extracted: &Option<String>| {
            non_blank(Some(current))
                .or(non_blank(extracted.as_deref()))
                .map(str::to_string)
        };
        let context = SearchContext {
            name: pick(&record.name, &extraction.fields.name),
            maker: pick(&record.maker, &extraction.fields.maker),
            style: pick(&record.style, &extraction.fields.style),
            keywords: extraction.keywords.clone(),
        };
        let candidate_urls: Vec<String> = [extraction.fields.product_url.as_deref(), Some(record.product_url.as_str())]
            .into_iter()
            .filter_map(non_blank)
            .map(str::to_string)
            .collect();
        info!(record_id = %record.id, context = ?context, candidate_urls = ?candidate_urls, "agent.search.start");

        let outcome = self
            .search_enricher()
            .run_search_enrichment(&context, &candidate_urls)
            .await?;
        apply_enrichment(record, &outcome.fields, &[]);
        info!(
            record_id = %record.id,
            search_count = outcome.search_count,
            best_result_url = ?outcome.best_result_url,
            "agent.search.complete"
        );
        self.advance(record, ProcessingStatus::ImageEnriched, None, progress)
            .await
    }

    async fn process_back_image(
        &self,
        job: &ProcessJob,
        key: &str,
        record: &mut TastingRecord,
        progress: &dyn ProcessProgress,
    ) -> Result<()> {
        let media = self.media.download(key).await?;
        let mime_type = media
            .content_type
            .as_deref()
            .or(job.back_image_mime_type.as_deref())
            .unwrap_or(DEFAULT_IMAGE_MIME);
        let back = self
            .extractor
            .run_back_image_extraction(&media.to_base64(), mime_type)
            .await?;

        if record.nutrition_facts.as_ref().is_none_or(|facts| facts.is_empty()) {
            if let Some(facts) = back.nutrition_facts.clone() {
                record.nutrition_facts = Some(facts);
            }
        }
        if record.ingredients.as_ref().is_none_or(Vec::is_empty) && !back.ingredients.is_empty() {
            record.ingredients = Some(back.ingredients.clone());
        }
        info!(
            record_id = %record.id,
            has_nutrition = back.nutrition_facts.is_some(),
            ingredient_count = back.ingredients.len(),
            "agent.back.complete"
        );
        self.advance(record, ProcessingStatus::BackExtracted, None, progress)
            .await
    }

    async fn process_voice(
        &self,
        job: &ProcessJob,
        key: &str,
        record: &mut TastingRecord,
        progress: &dyn ProcessProgress,
    ) -> Result<()> {
        let media = self.media.download(key).await?;
        let mime_type = job
            .voice_mime_type
            .as_deref()
            .or(media.content_type.as_deref())
            .unwrap_or(DEFAULT_VOICE_MIME);
        let transcript = self.transcriber.transcribe(&media.bytes, mime_type).await?;
        let transcript_overwrite: &[RecordField] = if job.force_voice {
            &[RecordField::VoiceTranscript]
        } else {
            &[]
        };
        apply_enrichment(
            record,
            &AgentEnrichment {
                voice_transcript: Some(transcript.clone()),
                ..AgentEnrichment::default()
            },
            transcript_overwrite,
        );
        self.advance(record, ProcessingStatus::VoiceTranscribed, None, progress)
            .await?;

        let metrics = self.extractor.extract_voice_metrics(&transcript).await?;
        let metrics_overwrite: &[RecordField] = if job.force_voice {
            &[RecordField::Score, RecordField::HeatUser]
        } else {
            &[]
        };
        apply_enrichment(record, &metrics, metrics_overwrite);
        self.advance(record, ProcessingStatus::VoiceExtracted, None, progress)
            .await?;

        let had_notes = !record.tasting_notes_user.trim().is_empty();
        let notes = self.extractor.format_tasting_notes(&transcript).await?;
        if let Some(text) = notes.notes.as_deref() {
            let notes_overwrite: &[RecordField] = if job.force_voice {
                &[RecordField::TastingNotesUser]
            } else {
                &[]
            };
            apply_enrichment(
                record,
                &AgentEnrichment {
                    tasting_notes_user: Some(text.to_string()),
                    ..AgentEnrichment::default()
                },
                notes_overwrite,
            );
        }
        match notes.source {
            NotesSource::Fallback if job.force_voice || !had_notes => {
                record.needs_attention = Some(true);
                record.attention_reason = Some(NOTES_FALLBACK_REASON.to_string());
                warn!(record_id = %record.id, "agent.notes.fallback");
            }
            NotesSource::Llm if record.attention_reason.as_deref() == Some(NOTES_FALLBACK_REASON) => {
                record.needs_attention = None;
                record.attention_reason = None;
            }
            _ => {}
        }
        self.advance(record, ProcessingStatus::NotesFormatted, None, progress)
            .await
    }

    async fn advance(
        &self,
        record: &mut TastingRecord,
        status: ProcessingStatus,
        processing_error: Option<&str>,
        progress: &dyn ProcessProgress,
    ) -> Result<()> {
        update_record_status(&self.storage, record, status, processing_error).await?;
        progress.step(status);
        Ok(())
    }
}
