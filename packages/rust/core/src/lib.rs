//! Enrichment pipeline and domain logic for Scorchbook.
//!
//! This crate ties together label extraction, web search, page reading and
//! voice-note processing into the per-tasting processing run
//! ([`pipeline::TastingProcessor`]) and the background queue that drives it.

pub mod consensus;
pub mod extraction;
pub mod hints;
pub mod notes;
pub mod pages;
pub mod pipeline;
pub mod profile;
pub mod queue;
pub mod scoring;
pub mod search_enrichment;
pub mod text;

#[cfg(test)]
mod testing;

pub use extraction::{BackExtraction, Extractor, ImageExtraction};
pub use notes::{NotesResult, NotesSource};
pub use pages::PageSource;
pub use pipeline::{
    ProcessJob, ProcessProgress, RecordField, SilentProgress, TastingProcessor, apply_enrichment,
    update_record_status,
};
pub use profile::EnrichmentProfile;
pub use queue::{JobQueue, JobRunner};
pub use search_enrichment::{SearchEnricher, SearchEnrichment};
