//! Application configuration for Scorchbook.
//!
//! User config lives at `~/.scorchbook/scorchbook.toml`.
//! Environment variables override config file values, which override defaults.
//! API keys are never stored; config names the env var that holds each key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScorchbookError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "scorchbook.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".scorchbook";

// ---------------------------------------------------------------------------
// Config structs (matching scorchbook.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Record database and media store locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Language model settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Product page fetching.
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Speech transcription service.
    #[serde(default)]
    pub transcribe: TranscribeConfig,

    /// Identity provider settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Rate-limited LLM proxy.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Enrichment vocabulary selection.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the API listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// CORS allow-list. `*` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Capacity of the background processing queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["*".into()]
}
fn default_queue_capacity() -> usize {
    64
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL database file. `~/` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Root directory for uploaded photos and voice notes.
    #[serde(default = "default_media_dir")]
    pub media_dir: String,

    /// Public base URL media keys are appended to. When unset, media URLs
    /// use the `media://` scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_media_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            media_dir: default_media_dir(),
            public_media_base_url: None,
        }
    }
}

fn default_database_path() -> String {
    "~/.scorchbook/scorchbook.db".into()
}
fn default_media_dir() -> String {
    "~/.scorchbook/media".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Messages API base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used for extraction and note formatting.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Per-request timeout.
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_api_key_env(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            request_timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.anthropic.com/v1".into()
}
fn default_llm_model() -> String {
    "claude-3-haiku-20240307".into()
}
fn default_llm_timeout() -> u64 {
    60
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the Tavily key (plain or JSON secret).
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,

    /// Tavily search endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Results requested per query.
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_api_key_env(),
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
        }
    }
}

fn default_search_api_key_env() -> String {
    "TAVILY_API_KEY".into()
}
fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".into()
}
fn default_max_results() -> u32 {
    8
}

/// `[crawl]` section: product page fetching during search enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Per-page fetch timeout.
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,

    /// Fetched HTML is truncated to this many characters.
    #[serde(default = "default_max_html_chars")]
    pub max_html_chars: usize,

    /// Permit fetching loopback/private addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_timeout_ms: default_page_timeout_ms(),
            max_html_chars: default_max_html_chars(),
            allow_private_hosts: false,
        }
    }
}

fn default_page_timeout_ms() -> u64 {
    4_500
}
fn default_max_html_chars() -> usize {
    120_000
}

/// `[transcribe]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeConfig {
    /// Base URL of the transcription job service.
    #[serde(default = "default_transcribe_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the service key (optional).
    #[serde(default = "default_transcribe_api_key_env")]
    pub api_key_env: String,

    /// BCP-47 language code.
    #[serde(default = "default_language")]
    pub language: String,

    /// Delay between job status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polls before the job is considered timed out.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_transcribe_endpoint(),
            api_key_env: default_transcribe_api_key_env(),
            language: default_language(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
        }
    }
}

fn default_transcribe_endpoint() -> String {
    "http://127.0.0.1:9000".into()
}
fn default_transcribe_api_key_env() -> String {
    "TRANSCRIBE_API_KEY".into()
}
fn default_language() -> String {
    "en-US".into()
}
fn default_poll_interval_ms() -> u64 {
    1_500
}
fn default_max_polls() -> u32 {
    40
}

/// `[auth]` section: managed identity provider (Cognito user pool).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// User pool id, e.g. `us-east-1_AbCdEf`. The region is its prefix.
    #[serde(default)]
    pub user_pool_id: String,

    /// App client id; id tokens must carry it as audience.
    #[serde(default)]
    pub client_id: String,

    /// Explicit issuer; derived from the pool id when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Explicit JWKS URL; `{issuer}/.well-known/jwks.json` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_url: Option<String>,
}

impl AuthConfig {
    /// Token issuer for the configured pool.
    pub fn resolved_issuer(&self) -> Result<String> {
        if let Some(issuer) = self.issuer.as_deref().filter(|s| !s.trim().is_empty()) {
            return Ok(issuer.trim_end_matches('/').to_string());
        }
        let pool = self.user_pool_id.trim();
        let region = pool
            .split_once('_')
            .map(|(region, _)| region)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ScorchbookError::config("Missing Cognito configuration"))?;
        Ok(format!("https://cognito-idp.{region}.amazonaws.com/{pool}"))
    }

    /// JWKS document location.
    pub fn resolved_jwks_url(&self) -> Result<String> {
        match self.jwks_url.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(url) => Ok(url.to_string()),
            None => Ok(format!("{}/.well-known/jwks.json", self.resolved_issuer()?)),
        }
    }
}

/// `[proxy]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Requests allowed per user per UTC minute.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Model forwarded to; falls back to `[llm].model` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Default `max_tokens` when the body omits it.
    #[serde(default = "default_proxy_max_tokens")]
    pub default_max_tokens: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit(),
            model: None,
            default_max_tokens: default_proxy_max_tokens(),
        }
    }
}

fn default_rate_limit() -> u32 {
    30
}
fn default_proxy_max_tokens() -> u32 {
    256
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Vocabulary profile: `hot-sauce` or `drink`.
    #[serde(default = "default_profile")]
    pub profile: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
        }
    }
}

fn default_profile() -> String {
    "hot-sauce".into()
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the env in production).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(origins) = get("ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(bind) = get("SCORCHBOOK_BIND") {
            self.server.bind = bind;
        }
        if let Some(path) = get("SCORCHBOOK_DB") {
            self.storage.database_path = path;
        }
        if let Some(dir) = get("SCORCHBOOK_MEDIA_DIR") {
            self.storage.media_dir = dir;
        }
        if let Some(base) = get("PUBLIC_MEDIA_BASE_URL") {
            self.storage.public_media_base_url = Some(base);
        }
        if let Some(model) = get("BEDROCK_MODEL_ID").or_else(|| get("MODEL_ID")) {
            self.llm.model = model;
        }
        if let Some(language) = get("TRANSCRIBE_LANGUAGE") {
            self.transcribe.language = language;
        }
        if let Some(ms) = get("TRANSCRIBE_POLL_MS").and_then(|v| v.parse().ok()) {
            self.transcribe.poll_interval_ms = ms;
        }
        if let Some(polls) = get("TRANSCRIBE_MAX_POLLS").and_then(|v| v.parse().ok()) {
            self.transcribe.max_polls = polls;
        }
        if let Some(limit) = get("RATE_LIMIT_PER_MINUTE").and_then(|v| v.parse().ok()) {
            self.proxy.rate_limit_per_minute = limit;
        }
        if let Some(pool) = get("COGNITO_USER_POOL_ID") {
            self.auth.user_pool_id = pool;
        }
        if let Some(client) = get("COGNITO_CLIENT_ID") {
            self.auth.client_id = client;
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.scorchbook/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ScorchbookError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.scorchbook/scorchbook.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk and apply environment overrides.
/// Returns defaults (plus overrides) if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env_overrides();
    Ok(config)
}

/// Load the application config from a specific file path (no env overrides).
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ScorchbookError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ScorchbookError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ScorchbookError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ScorchbookError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ScorchbookError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Read an API key from the env var named in config.
pub fn read_api_key(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().and_then(|raw| parse_secret_api_key(&raw))
}

/// Check that a required API key env var is set and non-empty.
pub fn require_api_key(var_name: &str, service: &str) -> Result<String> {
    read_api_key(var_name).ok_or_else(|| {
        ScorchbookError::config(format!(
            "{service} API key not found. Set the {var_name} environment variable."
        ))
    })
}

/// Normalise a secret that may be a plain key or a JSON secret document.
///
/// JSON documents are searched for `api_key`, `apikey`, `key`,
/// `TAVILY_API_KEY`, `tavily_api_key` in that order; a document holding a
/// single string value yields that value.
pub fn parse_secret_api_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(trimmed) {
            Ok(doc) => {
                for key in ["api_key", "apikey", "key", "TAVILY_API_KEY", "tavily_api_key"] {
                    if let Some(value) = doc.get(key).and_then(|v| v.as_str()) {
                        if !value.trim().is_empty() {
                            return Some(value.trim().to_string());
                        }
                    }
                }
                let strings: Vec<&str> = doc
                    .values()
                    .filter_map(|v| v.as_str())
                    .filter(|s| !s.trim().is_empty())
                    .collect();
                if let [only] = strings.as_slice() {
                    return Some(only.trim().to_string());
                }
            }
            Err(e) => tracing::warn!(error = %e, "secret api key is not valid JSON"),
        }
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("TAVILY_API_KEY"));
        assert!(toml_str.contains("hot-sauce"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.transcribe.poll_interval_ms, 1_500);
        assert_eq!(parsed.transcribe.max_polls, 40);
        assert_eq!(parsed.proxy.rate_limit_per_minute, 30);
        assert_eq!(parsed.crawl.page_timeout_ms, 4_500);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml_str = r#"
[server]
bind = "0.0.0.0:9000"

[enrichment]
profile = "drink"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.allowed_origins, vec!["*".to_string()]);
        assert_eq!(config.enrichment.profile, "drink");
        assert_eq!(config.search.max_results, 8);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example"),
            ("RATE_LIMIT_PER_MINUTE", "5"),
            ("TRANSCRIBE_POLL_MS", "not-a-number"),
            ("BEDROCK_MODEL_ID", "claude-test"),
            ("PUBLIC_MEDIA_BASE_URL", "https://cdn.example"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.server.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.proxy.rate_limit_per_minute, 5);
        assert_eq!(config.transcribe.poll_interval_ms, 1_500);
        assert_eq!(config.llm.model, "claude-test");
        assert_eq!(
            config.storage.public_media_base_url.as_deref(),
            Some("https://cdn.example")
        );
    }

    #[test]
    fn issuer_derived_from_pool_id() {
        let auth = AuthConfig {
            user_pool_id: "us-east-1_AbC123".into(),
            client_id: "client".into(),
            issuer: None,
            jwks_url: None,
        };
        assert_eq!(
            auth.resolved_issuer().unwrap(),
            "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_AbC123"
        );
        assert!(auth.resolved_jwks_url().unwrap().ends_with("/.well-known/jwks.json"));

        let missing = AuthConfig::default();
        assert!(missing.resolved_issuer().is_err());
    }

    #[test]
    fn secret_key_parsing() {
        assert_eq!(parse_secret_api_key("  tvly-abc  ").as_deref(), Some("tvly-abc"));
        assert_eq!(parse_secret_api_key("   "), None);
        assert_eq!(
            parse_secret_api_key(r#"{"TAVILY_API_KEY": "tvly-json"}"#).as_deref(),
            Some("tvly-json")
        );
        assert_eq!(
            parse_secret_api_key(r#"{"something": "only-one"}"#).as_deref(),
            Some("only-one")
        );
        // Ambiguous documents fall back to the raw text.
        let raw = r#"{"a": "one", "b": "two"}"#;
        assert_eq!(parse_secret_api_key(raw).as_deref(), Some(raw));
    }

    #[test]
    fn api_key_validation() {
        let result = require_api_key("SB_TEST_NONEXISTENT_KEY_12345", "Tavily");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn home_expansion() {
        assert_eq!(expand_home("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/data/x.db"), home.join("data/x.db"));
        }
    }
}
