//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use scorchbook_api::{AppState, Authenticator, CognitoVerifier};
use scorchbook_core::{JobQueue, JobRunner, ProcessJob, ProcessProgress};
use scorchbook_shared::{
    AppConfig, ListFilters, ProcessingStatus, SearchContext, TastingId, expand_home, init_config,
    load_config,
};
use scorchbook_storage::{Storage, infer_mime_type_from_key};
use tracing::{info, warn};

use crate::services;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Scorchbook: a tasting log that fills itself in from label photos.
#[derive(Parser)]
#[command(
    name = "scorchbook",
    version,
    about = "Tasting-log API server and label enrichment pipeline.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the HTTP API with its background processing worker.
    Serve {
        /// Listen address (defaults to `[server].bind`).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run the enrichment pipeline for one tasting in the foreground.
    Process {
        /// Tasting id.
        id: String,

        /// Let voice-derived fields replace existing values.
        #[arg(long)]
        force_voice: bool,
    },

    /// Run web search enrichment for a product description.
    Search {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        maker: Option<String>,

        #[arg(long)]
        style: Option<String>,

        /// Extra search keyword (repeatable).
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// Candidate product URL to consider first (repeatable).
        #[arg(long = "url")]
        urls: Vec<String>,
    },

    /// List stored tastings.
    List {
        /// Substring of the name.
        #[arg(long)]
        name: Option<String>,

        /// Substring of the style.
        #[arg(long)]
        style: Option<String>,

        #[arg(long)]
        min_score: Option<f64>,

        #[arg(long)]
        max_score: Option<f64>,

        #[arg(long)]
        min_heat: Option<f64>,

        #[arg(long)]
        max_heat: Option<f64>,

        /// Exact tasting date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,

        /// Print records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extraction cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Drop every cached page extraction.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "scorchbook=info",
        1 => "scorchbook=debug,tower_http=debug",
        _ => "scorchbook=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { bind } => cmd_serve(bind).await,
        Command::Process { id, force_voice } => cmd_process(&id, force_voice).await,
        Command::Search {
            name,
            maker,
            style,
            keywords,
            urls,
        } => {
            let context = SearchContext {
                name,
                maker,
                style,
                keywords,
            };
            cmd_search(&context, &urls).await
        }
        Command::List {
            name,
            style,
            min_score,
            max_score,
            min_heat,
            max_heat,
            date,
            json,
        } => {
            let filters = ListFilters {
                name,
                style,
                min_score,
                max_score,
                min_heat,
                max_heat,
                date,
            };
            cmd_list(&filters, json).await
        }
        Command::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(bind: Option<String>) -> Result<()> {
    let config = load_config()?;
    let services = services::build(&config).await?;

    if config.auth.user_pool_id.trim().is_empty() && config.auth.issuer.is_none() {
        warn!("no identity provider configured; write routes will reject every token");
    }
    let auth: Arc<dyn Authenticator> = Arc::new(CognitoVerifier::new(config.auth.clone())?);

    let runner: Arc<dyn JobRunner> = Arc::new(services.processor.clone());
    let (queue, worker) = JobQueue::spawn(runner, config.server.queue_capacity);

    let state = Arc::new(AppState {
        storage: services.storage,
        media: services.media,
        queue,
        auth,
        model: services.proxy_model,
        allowed_origins: config.server.allowed_origins.clone(),
        proxy: config.proxy.clone(),
    });

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    scorchbook_api::serve(state, &bind).await?;

    // Handles held by the router are gone; let queued jobs finish.
    info!("draining processing queue");
    if let Err(e) = worker.await {
        warn!(error = %e, "processing worker ended abnormally");
    }
    Ok(())
}

async fn cmd_process(id: &str, force_voice: bool) -> Result<()> {
    let record_id: TastingId = id.parse().map_err(|e| eyre!("invalid tasting id '{id}': {e}"))?;
    let config = load_config()?;
    let services = services::build(&config).await?;

    let record = services
        .storage
        .get_tasting(&record_id)
        .await?
        .ok_or_else(|| eyre!("tasting {record_id} not found"))?;
    if !record.has_media() {
        return Err(eyre!("tasting {record_id} has no media to process"));
    }

    let mime_of = |key: &Option<String>| {
        key.as_deref()
            .and_then(infer_mime_type_from_key)
            .map(str::to_string)
    };
    let job = ProcessJob {
        record_id,
        image_key: record.image_key.clone(),
        image_mime_type: mime_of(&record.image_key),
        back_image_key: record.back_image_key.clone(),
        back_image_mime_type: mime_of(&record.back_image_key),
        voice_key: record.voice_key.clone(),
        voice_mime_type: mime_of(&record.voice_key),
        force_voice,
    };

    info!(%record_id, force_voice, "processing tasting");
    let reporter = CliProgress::new();
    let outcome = services.processor.process_tasting(&job, &reporter).await;
    reporter.finish();
    outcome?;

    let updated = services
        .storage
        .get_tasting(&record_id)
        .await?
        .ok_or_else(|| eyre!("tasting {record_id} disappeared during processing"))?;
    println!();
    println!("  Tasting processed!");
    println!("  ID:      {}", updated.id);
    println!("  Name:    {}", updated.name);
    println!("  Maker:   {}", updated.maker);
    println!("  Style:   {}", updated.style);
    println!(
        "  Status:  {}",
        updated.status.map_or("-", ProcessingStatus::as_str)
    );
    if let Some(reason) = updated.attention_reason.as_deref() {
        println!("  Review:  {reason}");
    }
    println!();
    Ok(())
}

async fn cmd_search(context: &SearchContext, urls: &[String]) -> Result<()> {
    if context.name.is_none() && context.maker.is_none() && context.style.is_none() && context.keywords.is_empty() {
        return Err(eyre!("give at least one of --name, --maker, --style or --keyword"));
    }
    let config = load_config()?;
    let services = services::build(&config).await?;

    let result = services
        .processor
        .search_enricher()
        .run_search_enrichment(context, urls)
        .await?;

    let output = serde_json::json!({
        "fields": result.fields,
        "searchCount": result.search_count,
        "bestResultUrl": result.best_result_url,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_list(filters: &ListFilters, json: bool) -> Result<()> {
    let config = load_config()?;
    let db_path = expand_home(&config.storage.database_path);
    if !db_path.exists() {
        return Err(eyre!("no database at '{}'; run `scorchbook serve` first", db_path.display()));
    }
    let storage = Storage::open_readonly(&db_path).await?;
    let tastings = storage.list_tastings(filters).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tastings)?);
        return Ok(());
    }
    if tastings.is_empty() {
        println!("No tastings found.");
        return Ok(());
    }

    let number = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |n| format!("{n:.1}"));
    for t in &tastings {
        println!(
            "{}  {}  {:<32}  {:<24}  score {:>4}  heat {:>4}  {}",
            t.id,
            t.date,
            t.name,
            t.maker,
            number(t.score),
            number(t.heat_user),
            t.status.map_or("-", ProcessingStatus::as_str),
        );
    }
    println!();
    println!("  {} tasting(s)", tastings.len());
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open(&expand_home(&config.storage.database_path)).await?;
    let removed = storage.clear_enrichment_cache().await?;
    println!("Removed {removed} cached extraction(s).");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner showing the last completed processing step.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.red} {msg}") {
            spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        spinner.set_message("Processing");
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProcessProgress for CliProgress {
    fn step(&self, status: ProcessingStatus) {
        let label = match status {
            ProcessingStatus::Pending => "Queued",
            ProcessingStatus::ImageExtracted => "Read front label",
            ProcessingStatus::ImageEnriched => "Searched the web",
            ProcessingStatus::BackExtracted => "Read back label",
            ProcessingStatus::VoiceTranscribed => "Transcribed voice note",
            ProcessingStatus::VoiceExtracted => "Extracted voice ratings",
            ProcessingStatus::NotesFormatted => "Formatted tasting notes",
            ProcessingStatus::Complete => "Complete",
            ProcessingStatus::Error => "Failed",
        };
        self.spinner.set_message(label.to_string());
    }
}
