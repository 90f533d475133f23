//! The aggregation core facade.
//!
//! Owns the process-scoped caches and wires provider + store into the four
//! operations the web/API layer calls: sync, search, resolve, enrich. All
//! components are initialized once at startup; none need teardown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{debug, instrument, warn};

use crate::cache::TtlCache;
use crate::enrich::Enricher;
use crate::model::{CatalogVideo, RankedPage, ScoredVideo, SearchFilters};
use crate::provider::CatalogProvider;
use crate::resolve::{LinkResolver, Resolution, ResolveRequest};
use crate::search::scanner::FuzzyScanner;
use crate::search::{apply_relevance_floor, rank_candidates, sort_ranked, tokenize};
use crate::store::CatalogStore;
use crate::sync::{sync_catalog, SyncOptions, SyncReport};
use crate::util::env::env_parse;

pub struct AggregationCore {
    provider: Arc<dyn CatalogProvider>,
    store: Arc<dyn CatalogStore>,
    search_cache: TtlCache<String, RankedPage>,
    scanner: FuzzyScanner,
    enricher: Enricher,
    resolver: LinkResolver,
}

impl AggregationCore {
    /// Wire the core with env-tuned cache/concurrency settings
    /// (SEARCH_CACHE_TTL_SECS plus the component-specific knobs).
    pub fn new(provider: Arc<dyn CatalogProvider>, store: Arc<dyn CatalogStore>) -> Self {
        AggregationCore {
            search_cache: TtlCache::new(Duration::from_secs(env_parse(
                "SEARCH_CACHE_TTL_SECS",
                300u64,
            ))),
            scanner: FuzzyScanner::from_env(),
            enricher: Enricher::from_env(provider.clone()),
            resolver: LinkResolver::from_env(provider.clone()),
            provider,
            store,
        }
    }

    pub async fn sync_catalog(&self, opts: &SyncOptions) -> Result<SyncReport> {
        sync_catalog(self.provider.as_ref(), self.store.as_ref(), opts).await
    }

    /// Ranked fuzzy search over the stored catalog, supplemented from the
    /// upstream when the store under-returns. An empty query is a hard
    /// caller error; upstream trouble degrades the result instead of
    /// failing it.
    #[instrument(skip(self, filters))]
    pub async fn search_catalog(
        &self,
        query: &str,
        filters: &SearchFilters,
        page: i64,
        limit: i64,
    ) -> Result<RankedPage> {
        let tokenized = tokenize(query);
        if tokenized.is_empty() {
            bail!("search requires a non-empty query");
        }
        let page = page.max(1);
        let limit = limit.max(1);
        let cache_key = format!(
            "{}|{}|p{page}|l{limit}",
            tokenized.normalized,
            filters.fingerprint()
        );
        if let Some(hit) = self.search_cache.get(&cache_key) {
            debug!("search served from cache");
            return Ok(hit);
        }

        let provider_name = self.provider.name();
        let phrase_pattern = format!("%{}%", tokenized.normalized);
        let by_title = self
            .store
            .title_candidates(provider_name, &phrase_pattern, limit * 5)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "title candidate query failed");
                Vec::new()
            });
        let by_keyword = self
            .store
            .keyword_candidates(provider_name, &tokenized.tokens, limit * 5)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "keyword candidate query failed");
                Vec::new()
            });
        let by_upstream = match self.provider.search(query).await {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "upstream search failed; continuing with store candidates");
                Vec::new()
            }
        };

        let mut ranked = rank_candidates(vec![by_title, by_keyword, by_upstream], &tokenized);

        let target = (page * limit) as usize;
        if ranked.len() < target {
            let extra = self
                .scanner
                .supplement(self.provider.as_ref(), &tokenized, filters, target)
                .await;
            for hit in extra {
                if !ranked
                    .iter()
                    .any(|r| r.video.dedup_key() == hit.video.dedup_key())
                {
                    ranked.push(hit);
                }
            }
            sort_ranked(&mut ranked);
        }

        let (kept, tier) = apply_relevance_floor(&ranked, filters, target);
        let window: Vec<ScoredVideo> = kept
            .into_iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .collect();

        // Enrich only the page actually being returned.
        let (scores, videos): (Vec<(f64, f64)>, Vec<CatalogVideo>) = window
            .into_iter()
            .map(|s| ((s.score, s.coverage), s.video))
            .unzip();
        let enriched = self.enricher.enrich(videos).await;
        let items: Vec<ScoredVideo> = scores
            .into_iter()
            .zip(enriched)
            .map(|((score, coverage), video)| ScoredVideo {
                video,
                score,
                coverage,
            })
            .collect();

        let result = RankedPage {
            total_ranked: ranked.len(),
            items,
            page,
            limit,
            relaxation_tier: tier,
        };
        self.search_cache.put(cache_key, result.clone());
        Ok(result)
    }

    pub async fn resolve_link(&self, req: &ResolveRequest) -> Result<Resolution> {
        self.resolver.resolve(req).await
    }

    pub async fn enrich(&self, items: Vec<CatalogVideo>) -> Vec<CatalogVideo> {
        self.enricher.enrich(items).await
    }
}
