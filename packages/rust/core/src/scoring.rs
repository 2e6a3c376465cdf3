//! Relevance heuristics for search results, pages and product URLs.
//!
//! Every score is an additive integer built from token overlap with the
//! [`SearchContext`] and the profile's domain lists. Higher is better;
//! blocked domains push a candidate well below zero.

use scorchbook_search::SearchResult;
use scorchbook_shared::SearchContext;
use serde::Serialize;

use crate::profile::EnrichmentProfile;
use crate::text::{has_all_tokens, hostname, normalize_text, tokens_from_value, truncate_chars};

/// Characters of page content considered by [`Scorer::score_content_signals`].
const CONTENT_MATCH_CHARS: usize = 8_000;

/// Context tokens precomputed once per enrichment run.
#[derive(Debug, Clone)]
pub struct Scorer<'a> {
    profile: &'a EnrichmentProfile,
    context: &'a SearchContext,
    name_tokens: Vec<String>,
    maker_tokens: Vec<String>,
    style_tokens: Vec<String>,
    keyword_tokens: Vec<String>,
}

/// A search result with its score, for logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub title: String,
    pub url: String,
    pub score: i32,
}

impl<'a> Scorer<'a> {
    pub fn new(profile: &'a EnrichmentProfile, context: &'a SearchContext) -> Self {
        let mut keyword_tokens: Vec<String> = Vec::new();
        for keyword in &context.keywords {
            for token in tokens_from_value(Some(keyword)) {
                if !keyword_tokens.contains(&token) {
                    keyword_tokens.push(token);
                }
            }
        }
        Self {
            profile,
            context,
            name_tokens: tokens_from_value(context.name.as_deref()),
            maker_tokens: tokens_from_value(context.maker.as_deref()),
            style_tokens: tokens_from_value(context.style.as_deref()),
            keyword_tokens,
        }
    }

    pub fn profile(&self) -> &EnrichmentProfile {
        self.profile
    }

    pub fn context(&self) -> &SearchContext {
        self.context
    }

    /// Score a search hit from its title, snippet and URL.
    pub fn score_search_result(&self, result: &SearchResult) -> i32 {
        let text = normalize_text(&format!("{} {}", result.title, result.snippet));
        let url = result.url.to_lowercase();
        let mut score = 0;

        if !self.name_tokens.is_empty() && has_all_tokens(&text, &self.name_tokens) {
            score += 6;
        }
        if !self.name_tokens.is_empty() && has_all_tokens(&url, &self.name_tokens) {
            score += 5;
        }
        if !self.maker_tokens.is_empty() && has_all_tokens(&text, &self.maker_tokens) {
            score += 4;
        }
        if !self.maker_tokens.is_empty() && has_all_tokens(&url, &self.maker_tokens) {
            score += 3;
        }
        if !self.style_tokens.is_empty() && has_all_tokens(&text, &self.style_tokens) {
            score += 2;
        }
        if self.profile.mentions_category(&text) {
            score += 2;
        }
        if self.profile.has_product_hint(&url) {
            score += 1;
        }
        score + self.score_hostname_tokens(&result.url) + self.domain_adjustment(&result.url)
    }

    /// Score how much of the maker and name appear in the hostname.
    pub fn score_hostname_tokens(&self, url: &str) -> i32 {
        let Some(host) = hostname(url) else {
            return 0;
        };
        let host = host.replace('.', "");
        let mut score = 0;

        if !self.maker_tokens.is_empty() {
            let matches = self.maker_tokens.iter().filter(|t| host.contains(t.as_str())).count();
            if matches == self.maker_tokens.len() {
                score += 6;
            } else if matches > 0 {
                score += 2 + matches as i32;
            }
        }
        if !self.name_tokens.is_empty() {
            let matches = self.name_tokens.iter().filter(|t| host.contains(t.as_str())).count();
            if matches == self.name_tokens.len() {
                score += 3;
            } else if matches > 0 {
                score += 1;
            }
        }
        score
    }

    /// Score a bare URL as a product page candidate.
    pub fn score_url_candidate(&self, url: &str) -> i32 {
        let lower = url.to_lowercase();
        let mut score = 0;

        if !self.name_tokens.is_empty() && has_all_tokens(&lower, &self.name_tokens) {
            score += 6;
        }
        if !self.maker_tokens.is_empty() && has_all_tokens(&lower, &self.maker_tokens) {
            score += 4;
        }
        if !self.style_tokens.is_empty() && has_all_tokens(&lower, &self.style_tokens) {
            score += 2;
        }
        if self.profile.has_product_hint(&lower) {
            score += 2;
        }
        score + self.score_hostname_tokens(url) + self.domain_adjustment(url)
    }

    /// Score page text by how much of the context it mentions.
    pub fn score_content_signals(&self, content: &str) -> i32 {
        let normalized = normalize_text(truncate_chars(content, CONTENT_MATCH_CHARS));
        let any = |tokens: &[String]| tokens.iter().any(|t| normalized.contains(t.as_str()));
        let mut score = 0;

        if !self.name_tokens.is_empty() {
            if has_all_tokens(&normalized, &self.name_tokens) {
                score += 5;
            } else if any(&self.name_tokens) {
                score += 2;
            }
        }
        if !self.maker_tokens.is_empty() {
            if has_all_tokens(&normalized, &self.maker_tokens) {
                score += 3;
            } else if any(&self.maker_tokens) {
                score += 1;
            }
        }
        if any(&self.style_tokens) {
            score += 1;
        }
        if any(&self.keyword_tokens) {
            score += 1;
        }
        if self.profile.mentions_category(&normalized) {
            score += 1;
        }
        score
    }

    /// Whether a second, maker-focused query is worth running: only when
    /// the maker is known and none of the top three hits is on a
    /// maker-looking domain or carries the maker in its title.
    pub fn should_run_official_query(&self, results: &[SearchResult]) -> bool {
        if self.maker_tokens.is_empty() {
            return false;
        }
        let top = &results[..results.len().min(3)];
        if top.iter().any(|r| self.score_hostname_tokens(&r.url) >= 4) {
            return false;
        }
        !top
            .iter()
            .any(|r| has_all_tokens(&normalize_text(&r.title), &self.maker_tokens))
    }

    /// Highest-scoring result; ties keep the earlier one.
    pub fn select_best_search_result<'r>(
        &self,
        results: &'r [SearchResult],
    ) -> Option<(&'r SearchResult, i32)> {
        let mut best: Option<(&SearchResult, i32)> = None;
        for result in results {
            let score = self.score_search_result(result);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((result, score));
            }
        }
        best
    }

    /// Results ordered by score, descending and stable.
    pub fn rank_search_results<'r>(&self, results: &'r [SearchResult]) -> Vec<(&'r SearchResult, i32)> {
        let mut ranked: Vec<_> = results
            .iter()
            .map(|r| (r, self.score_search_result(r)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    /// Top `limit` results by score.
    pub fn summarize_search_results(&self, results: &[SearchResult], limit: usize) -> Vec<ScoredResult> {
        self.rank_search_results(results)
            .into_iter()
            .take(limit)
            .map(|(r, score)| ScoredResult {
                title: r.title.clone(),
                url: r.url.clone(),
                score,
            })
            .collect()
    }

    /// Best non-empty candidate by URL score; ties keep the earlier one.
    pub fn pick_best_product_url<'u>(
        &self,
        candidates: impl IntoIterator<Item = &'u str>,
    ) -> Option<String> {
        let mut best: Option<(&str, i32)> = None;
        for url in candidates.into_iter().map(str::trim).filter(|u| !u.is_empty()) {
            let score = self.score_url_candidate(url);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((url, score));
            }
        }
        best.map(|(url, _)| url.to_string())
    }

    fn domain_adjustment(&self, url: &str) -> i32 {
        let mut score = self.profile.trusted_score(url);
        if self.profile.is_marketplace(url) {
            score -= 1;
        }
        if self.profile.is_blocked(url) {
            score -= 6;
        }
        score
    }
}
