//! Web search enrichment: query, rank, read the best pages, and settle on
//! one set of vendor fields.

use futures::future::join_all;
use scorchbook_search::{SearchProvider, SearchResult, merge_search_results};
use scorchbook_shared::{AgentEnrichment, SearchContext};
use tracing::{info, instrument, warn};

use crate::consensus::{PAGE_EXTRACTION_LIMIT, extract_from_top_pages};
use crate::extraction::Extractor;
use crate::pages::{PageSignals, PageSource, build_page_signals, merge_page_signals, summarize_page_signals};
use crate::scoring::Scorer;
use crate::text::non_blank;

/// Search hits whose pages are read.
const PAGE_FETCH_LIMIT: usize = 4;
/// Caller-supplied URLs read in addition to the hits.
const CANDIDATE_PAGE_LIMIT: usize = 2;
/// Pages tried one by one when heat or notes are still missing.
const EXTRA_PAGE_LIMIT: usize = 5;
/// Hits handed to the snippet-level fallback prompt.
const SEARCH_RESULT_PROMPT_LIMIT: usize = 8;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchEnrichment {
    pub fields: AgentEnrichment,
    pub search_count: usize,
    pub best_result_url: Option<String>,
}

/// Wires a search provider, a page source and an extractor together.
pub struct SearchEnricher<'a> {
    search: &'a dyn SearchProvider,
    pages: &'a dyn PageSource,
    extractor: &'a Extractor,
}

impl<'a> SearchEnricher<'a> {
    pub fn new(search: &'a dyn SearchProvider, pages: &'a dyn PageSource, extractor: &'a Extractor) -> Self {
        Self {
            search,
            pages,
            extractor,
        }
    }

    /// Search the web for the product described by `context` and extract
    /// vendor fields. `candidate_urls` are product URLs already known (from
    /// the label or the record); they are read alongside the search hits.
    /// Model failures on individual pages are logged and skipped.
    #[instrument(skip_all, fields(name = ?context.name, maker = ?context.maker))]
    pub async fn run_search_enrichment(
        &self,
        context: &SearchContext,
        candidate_urls: &[String],
    ) -> scorchbook_shared::Result<SearchEnrichment> {
        let profile = self.extractor.profile();
        let candidate_urls: Vec<&str> = candidate_urls.iter().filter_map(|u| non_blank(Some(u.as_str()))).collect();

        let query = profile.build_search_query(context);
        if query.is_empty() {
            warn!(reason = "missing_query_terms", "agent.search.skipped");
            return Ok(SearchEnrichment::default());
        }
        info!(query = %query, context = ?context, candidate_urls = ?candidate_urls, "agent.search.context");

        let scorer = Scorer::new(profile, context);
        let mut results = self.search.search(&query).await;

        let official_query = profile.build_official_query(context);
        if !official_query.is_empty() && (results.is_empty() || scorer.should_run_official_query(&results)) {
            let official = self.search.search(&official_query).await;
            if !official.is_empty() {
                info!(query = %official_query, added = official.len(), "agent.search.official");
            }
            results = merge_search_results(results, official);
        }

        info!(count = results.len(), query = %query, "agent.search.results");
        if results.is_empty() {
            warn!(query = %query, "agent.search.empty");
        } else {
            info!(top = ?scorer.summarize_search_results(&results, 3), "agent.search.top");
        }

        let best_result = scorer.select_best_search_result(&results).map(|(r, _)| r.url.clone());
        let pages = self.gather_pages(&scorer, &results, &candidate_urls).await;
        info!(pages = ?summarize_page_signals(&pages, 3), "agent.search.pages");

        let best_page = pages.first().map(|p| p.result.url.clone()).or(best_result);
        info!(url = ?best_page, score = ?pages.first().map(|p| p.score), "agent.search.best");

        let mut fields = if pages.is_empty() {
            AgentEnrichment::default()
        } else {
            extract_from_top_pages(self.extractor, context, &pages, &scorer).await
        };

        if !pages.is_empty() && (fields.heat_vendor.is_none() || non_blank(fields.tasting_notes_vendor.as_deref()).is_none()) {
            self.fill_from_extra_pages(context, &pages, &mut fields).await;
        }

        if fields.is_empty() && !results.is_empty() {
            let head = &results[..results.len().min(SEARCH_RESULT_PROMPT_LIMIT)];
            fields = self
                .extractor
                .extract_from_search_results(context, head, best_page.as_deref())
                .await?;
        }

        let product_url = {
            let page_urls = pages.iter().take(PAGE_EXTRACTION_LIMIT).map(|p| p.result.url.as_str());
            let candidates = candidate_urls
                .iter()
                .copied()
                .chain(best_page.as_deref())
                .chain(fields.product_url.as_deref())
                .chain(page_urls);
            scorer.pick_best_product_url(candidates)
        };
        if let Some(url) = product_url {
            info!(url = %url, "agent.search.product_url");
            fields.product_url = Some(url);
        }

        info!(fields = ?fields.filled_fields(), "agent.search.fields");
        Ok(SearchEnrichment {
            fields,
            search_count: results.len(),
            best_result_url: best_page,
        })
    }

    /// Signals for the top hits plus any candidate URLs not among them,
    /// best first.
    async fn gather_pages(
        &self,
        scorer: &Scorer<'_>,
        results: &[SearchResult],
        candidate_urls: &[&str],
    ) -> Vec<PageSignals> {
        let top: Vec<SearchResult> = scorer
            .rank_search_results(results)
            .into_iter()
            .take(PAGE_FETCH_LIMIT)
            .map(|(r, _)| r.clone())
            .collect();
        let mut from_results = join_all(top.into_iter().map(|r| build_page_signals(r, scorer, self.pages))).await;
        from_results.sort_by(|a, b| b.score.cmp(&a.score));

        let extra: Vec<SearchResult> = candidate_urls
            .iter()
            .filter(|url| !results.iter().any(|r| r.url == **url))
            .take(CANDIDATE_PAGE_LIMIT)
            .map(|url| SearchResult::from_url(*url))
            .collect();
        let from_candidates = join_all(extra.into_iter().map(|r| build_page_signals(r, scorer, self.pages))).await;

        merge_page_signals(from_results, from_candidates)
    }

    /// Read pages past the consensus set, one at a time, until heat and
    /// notes are both known.
    async fn fill_from_extra_pages(&self, context: &SearchContext, pages: &[PageSignals], fields: &mut AgentEnrichment) {
        let extra = pages.get(PAGE_EXTRACTION_LIMIT..EXTRA_PAGE_LIMIT.min(pages.len())).unwrap_or_default();
        info!(
            missing_heat = fields.heat_vendor.is_none(),
            missing_notes = non_blank(fields.tasting_notes_vendor.as_deref()).is_none(),
            candidate_count = extra.len(),
            "agent.search.extract.more"
        );
        for page in extra {
            let extracted = match self.extractor.extract_from_page_content(context, page).await {
                Ok(Some(extracted)) => extracted,
                Ok(None) => continue,
                Err(e) => {
                    warn!(url = %page.result.url, error = %e, "agent.search.extract.page.error");
                    continue;
                }
            };
            if fields.heat_vendor.is_none() {
                fields.heat_vendor = extracted.heat_vendor;
            }
            if non_blank(fields.tasting_notes_vendor.as_deref()).is_none() {
                if let Some(notes) = extracted.tasting_notes_vendor {
                    fields.tasting_notes_vendor = Some(notes);
                }
            }
            if non_blank(fields.product_url.as_deref()).is_none() {
                if let Some(url) = extracted.product_url {
                    fields.product_url = Some(url);
                }
            }
            if fields.heat_vendor.is_some() && non_blank(fields.tasting_notes_vendor.as_deref()).is_some() {
                break;
            }
        }
    }
}
