//! Tavily search API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scorchbook_shared::{Result, ScorchbookError, SearchConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{SearchProvider, SearchResult, dedup_by_url};

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("Scorchbook/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    max_results: u32,
    include_answer: bool,
    include_images: bool,
    include_raw_content: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Default, Deserialize)]
struct TavilyHit {
    title: Option<serde_json::Value>,
    url: Option<serde_json::Value>,
    content: Option<serde_json::Value>,
    raw_content: Option<serde_json::Value>,
    snippet: Option<serde_json::Value>,
}

fn text_of(value: &Option<serde_json::Value>) -> String {
    value
        .as_ref()
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

impl TavilyHit {
    fn normalize(self) -> Option<SearchResult> {
        let url = text_of(&self.url);
        if url.is_empty() {
            return None;
        }
        let title = text_of(&self.title);
        let content = text_of(&self.content);
        let raw_content = text_of(&self.raw_content);
        let snippet = if content.is_empty() {
            text_of(&self.snippet)
        } else {
            content.clone()
        };

        Some(SearchResult {
            title: if title.is_empty() { url.clone() } else { title.clone() },
            snippet: if snippet.is_empty() { title } else { snippet },
            url,
            content: non_empty(content),
            raw_content: non_empty(raw_content),
        })
    }
}

/// Client for `POST {endpoint}` on the Tavily search API.
#[derive(Debug, Clone)]
pub struct TavilyClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: u32,
}

impl TavilyClient {
    /// Build a client. A missing key is allowed; searches are then skipped.
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ScorchbookError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            max_results: config.max_results,
        })
    }

    /// Build a client reading the key from the env var named in config.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        Self::new(config, scorchbook_shared::read_api_key(&config.api_key_env))
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, query: &str) -> Vec<SearchResult> {
        if query.is_empty() {
            return Vec::new();
        }
        let Some(api_key) = self.api_key.as_deref() else {
            warn!(reason = "missing_tavily_key", "agent.search.skipped");
            return Vec::new();
        };

        let payload = TavilyRequest {
            api_key,
            query,
            search_depth: "basic",
            max_results: self.max_results,
            include_answer: false,
            include_images: false,
            include_raw_content: true,
        };
        info!(provider = "tavily", query, max_results = self.max_results, "agent.search.request");

        let response = match self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = "tavily", reason = "network_error", error = %e, "agent.search.failed");
                return Vec::new();
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(provider = "tavily", status = status.as_u16(), "agent.search.failed");
            return Vec::new();
        }

        let body: TavilyResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(provider = "tavily", reason = "parse_failed", error = %e, "agent.search.failed");
                return Vec::new();
            }
        };

        dedup_by_url(body.results.into_iter().filter_map(TavilyHit::normalize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, key: Option<&str>) -> TavilyClient {
        let config = SearchConfig {
            endpoint: format!("{}/search", server.uri()),
            ..SearchConfig::default()
        };
        TavilyClient::new(&config, key.map(String::from)).unwrap()
    }

    #[tokio::test]
    async fn normalizes_and_dedups_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(serde_json::json!({
                "api_key": "tvly-test",
                "query": "\"Garlic Reaper\" hot sauce",
                "search_depth": "basic",
                "max_results": 8,
                "include_raw_content": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"title": " Garlic Reaper ", "url": "https://maker.com/p/1", "content": "Bold garlic", "raw_content": "<html>x</html>"},
                    {"title": "dup", "url": "https://maker.com/p/1", "content": "again"},
                    {"title": "", "url": "https://shop.com/x", "snippet": "snip"},
                    {"title": "no url", "content": "ignored"},
                    {"title": "Only title", "url": "https://t.com"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("tvly-test"));
        let results = client.search("\"Garlic Reaper\" hot sauce").await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "Garlic Reaper");
        assert_eq!(results[0].snippet, "Bold garlic");
        assert_eq!(results[0].content.as_deref(), Some("Bold garlic"));
        assert_eq!(results[0].raw_content.as_deref(), Some("<html>x</html>"));
        assert_eq!(results[1].title, "https://shop.com/x");
        assert_eq!(results[1].snippet, "snip");
        assert!(results[1].content.is_none());
        assert_eq!(results[2].snippet, "Only title");
    }

    #[tokio::test]
    async fn failures_yield_empty_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("tvly-test"));
        assert!(client.search("anything").await.is_empty());
    }

    #[tokio::test]
    async fn unparseable_body_yields_empty_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("tvly-test"));
        assert!(client.search("anything").await.is_empty());
    }

    #[tokio::test]
    async fn missing_key_or_query_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        assert!(!client.has_api_key());
        assert!(client.search("garlic").await.is_empty());

        let client = client_for(&server, Some("tvly-test"));
        assert!(client.search("").await.is_empty());
    }
}
