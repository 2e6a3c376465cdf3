//! Page signals: the text we know about a search hit and how relevant it
//! looks once its content is taken into account.

use async_trait::async_trait;
use scorchbook_crawler::{PageFetcher, contains_product_schema, extract_readable_text, looks_like_html};
use scorchbook_search::SearchResult;
use serde::Serialize;

use crate::scoring::Scorer;
use crate::text::{collapse_whitespace, truncate_chars};

/// Page text kept per signal.
const MAX_PAGE_CONTENT_CHARS: usize = 12_000;

/// Bonus for pages declaring a schema.org Product.
const PRODUCT_SCHEMA_BONUS: i32 = 3;

/// Fetches page HTML; `None` when the page is unavailable.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Option<String>;
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn fetch_html(&self, url: &str) -> Option<String> {
        PageFetcher::fetch_html(self, url).await
    }
}

/// Where a page's content text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    /// Provider-supplied page body.
    Raw,
    /// Fetched by us.
    Fetched,
    /// Provider summary.
    Summary,
    /// Title and snippet only.
    Snippet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageSignals {
    pub result: SearchResult,
    pub score: i32,
    pub content_text: String,
    pub has_product_schema: bool,
    pub content_source: ContentSource,
}

/// Log-friendly view of a page signal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub url: String,
    pub score: i32,
    pub has_product_schema: bool,
    pub content_source: ContentSource,
}

/// Gather and score a result's content. Provider page bodies win over
/// fetching; blocked domains are never fetched.
pub async fn build_page_signals(
    result: SearchResult,
    scorer: &Scorer<'_>,
    pages: &dyn PageSource,
) -> PageSignals {
    let base_score = scorer.score_search_result(&result);
    let raw_html = match &result.raw_content {
        Some(raw) => Some(raw.clone()),
        None if !scorer.profile().is_blocked(&result.url) => pages.fetch_html(&result.url).await,
        None => None,
    };

    let (content_text, has_product_schema, content_source) = match raw_html {
        Some(html) => {
            let text = if looks_like_html(&html) {
                extract_readable_text(&html)
            } else {
                collapse_whitespace(&html)
            };
            let source = if result.raw_content.is_some() {
                ContentSource::Raw
            } else {
                ContentSource::Fetched
            };
            (text, contains_product_schema(&html), source)
        }
        None => match &result.content {
            Some(content) => (collapse_whitespace(content), false, ContentSource::Summary),
            None => (
                collapse_whitespace(&format!("{} {}", result.title, result.snippet)),
                false,
                ContentSource::Snippet,
            ),
        },
    };

    let content_text = truncate_chars(&content_text, MAX_PAGE_CONTENT_CHARS).to_string();
    let schema_score = if has_product_schema { PRODUCT_SCHEMA_BONUS } else { 0 };
    PageSignals {
        score: base_score + scorer.score_content_signals(&content_text) + schema_score,
        result,
        content_text,
        has_product_schema,
        content_source,
    }
}

/// Union of two signal lists keeping the best-scored entry per URL, sorted
/// by score descending.
pub fn merge_page_signals(primary: Vec<PageSignals>, secondary: Vec<PageSignals>) -> Vec<PageSignals> {
    let mut merged: Vec<PageSignals> = Vec::new();
    for page in primary.into_iter().chain(secondary) {
        match merged.iter_mut().find(|p| p.result.url == page.result.url) {
            Some(existing) if page.score > existing.score => *existing = page,
            Some(_) => {}
            None => merged.push(page),
        }
    }
    merged.sort_by(|a, b| b.score.cmp(&a.score));
    merged
}

pub fn summarize_page_signals(pages: &[PageSignals], limit: usize) -> Vec<PageSummary> {
    pages
        .iter()
        .take(limit)
        .map(|p| PageSummary {
            url: p.result.url.clone(),
            score: p.score,
            has_product_schema: p.has_product_schema,
            content_source: p.content_source,
        })
        .collect()
}
