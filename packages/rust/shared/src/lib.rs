//! Shared types, error model, and configuration for Scorchbook.
//!
//! This crate is the foundation depended on by all other Scorchbook crates.
//! It provides:
//! - [`ScorchbookError`], the unified error type
//! - Domain types ([`TastingRecord`], [`ProcessingStatus`], [`AgentEnrichment`], [`TastingId`])
//! - Configuration ([`AppConfig`] and its sections, config loading)
//! - Input validation and sanitising

pub mod config;
pub mod error;
pub mod types;
pub mod validation;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AuthConfig, CrawlConfig, EnrichmentConfig, LlmConfig, ProxyConfig, SearchConfig,
    ServerConfig, StorageConfig, TranscribeConfig, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from, parse_secret_api_key, read_api_key,
    require_api_key,
};
pub use error::{Result, ScorchbookError};
pub use types::{
    AgentEnrichment, CreateTastingInput, ListFilters, NutritionFacts, ProcessingStatus,
    SearchContext, TastingId, TastingRecord, UserContext,
};
pub use validation::{sanitize_optional, sanitize_text, validate_create_tasting};
