//! Web search for product enrichment.
//!
//! Search never fails the pipeline: providers log and return an empty result
//! list on missing keys, transport errors, bad statuses, or unparseable
//! bodies. Callers treat "no results" and "search unavailable" alike.

mod tavily;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use tavily::TavilyClient;

// ---------------------------------------------------------------------------
// SearchResult
// ---------------------------------------------------------------------------

/// One normalised search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Page title; the URL when the provider gave none.
    pub title: String,
    pub url: String,
    /// Short description; the title when the provider gave none.
    pub snippet: String,
    /// Provider-side summary of the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Provider-side page body (HTML or text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

impl SearchResult {
    /// A bare result for a URL we want to inspect without a search hit.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            title: url.clone(),
            url,
            snippet: String::new(),
            content: None,
            raw_content: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run `query`; an empty query yields no results.
    async fn search(&self, query: &str) -> Vec<SearchResult>;
}

/// Concatenate two result lists, keeping the first occurrence of each URL.
pub fn merge_search_results(primary: Vec<SearchResult>, secondary: Vec<SearchResult>) -> Vec<SearchResult> {
    dedup_by_url(primary.into_iter().chain(secondary))
}

pub(crate) fn dedup_by_url(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let mut seen = std::collections::HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}
