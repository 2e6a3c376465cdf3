//! Wiring: build storage, clients and the processor from config.

use std::sync::Arc;

use color_eyre::eyre::Result;
use scorchbook_ai::{ClaudeClient, HttpTranscriber, LanguageModel, Transcriber};
use scorchbook_core::{EnrichmentProfile, Extractor, PageSource, TastingProcessor};
use scorchbook_crawler::PageFetcher;
use scorchbook_search::{SearchProvider, TavilyClient};
use scorchbook_shared::{AppConfig, expand_home};
use scorchbook_storage::{MediaStore, Storage};
use tracing::{debug, warn};

pub(crate) struct Services {
    pub storage: Arc<Storage>,
    pub media: MediaStore,
    pub processor: TastingProcessor,
    /// Model behind the `/llm` proxy.
    pub proxy_model: Arc<dyn LanguageModel>,
}

pub(crate) async fn build(config: &AppConfig) -> Result<Services> {
    let db_path = expand_home(&config.storage.database_path);
    debug!(path = %db_path.display(), "opening database");
    let storage = Arc::new(Storage::open(&db_path).await?);
    let media = MediaStore::new(
        expand_home(&config.storage.media_dir),
        config.storage.public_media_base_url.clone(),
    );

    let claude = ClaudeClient::from_config(&config.llm)?;
    let profile = EnrichmentProfile::from_name(&config.enrichment.profile)?;
    let extractor = Extractor::new(Arc::new(claude.clone()), profile).with_cache(storage.clone());

    let tavily = TavilyClient::from_config(&config.search)?;
    if !tavily.has_api_key() {
        warn!(env = %config.search.api_key_env, "no search API key; web enrichment will find nothing");
    }
    let search: Arc<dyn SearchProvider> = Arc::new(tavily);
    let pages: Arc<dyn PageSource> = Arc::new(PageFetcher::new(&config.crawl)?);
    let transcriber: Arc<dyn Transcriber> = Arc::new(HttpTranscriber::from_config(&config.transcribe)?);

    let proxy_model: Arc<dyn LanguageModel> = match config.proxy.model.as_deref() {
        Some(model) if !model.trim().is_empty() => Arc::new(claude.with_model(model.trim())),
        _ => Arc::new(claude),
    };

    let processor = TastingProcessor::new(storage.clone(), media.clone(), extractor, search, pages, transcriber);
    Ok(Services {
        storage,
        media,
        processor,
        proxy_model,
    })
}
