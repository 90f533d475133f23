//! Secondary-attribute backfill with differentiated caching.
//!
//! Listing feeds are thin: genres, countries, ratings and episode counts
//! often only exist in the per-id detail payload. The enricher backfills
//! those for the subset of a batch that is actually missing them, through a
//! semaphore-bounded lookup pool so a large page cannot stampede the
//! rate-limited detail endpoint.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::model::{CatalogVideo, VideoDetail, VideoKind};
use crate::provider::{CatalogProvider, DetailKey};
use crate::util::env::env_parse;

/// Cached outcome of one detail lookup. A failed or empty lookup still
/// writes an entry (`failed = true`) so a permanently-missing id cannot
/// cause a retry storm; failed entries are served as-is within the TTL.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentEntry {
    pub detail: VideoDetail,
    pub failed: bool,
}

impl EnrichmentEntry {
    /// A successful entry computed for a movie lacks the episode count a
    /// serial needs; such an entry must not satisfy a serial's lookup.
    fn satisfies(&self, kind: VideoKind) -> bool {
        self.failed || kind != VideoKind::Serial || self.detail.episodes_count.is_some()
    }
}

pub struct Enricher {
    provider: Arc<dyn CatalogProvider>,
    cache: TtlCache<i64, EnrichmentEntry>,
    limit: Arc<Semaphore>,
}

fn needs_enrichment(item: &CatalogVideo) -> bool {
    item.genres.is_empty()
        || item.countries.is_empty()
        || item.iframe_url.is_none()
        || (item.kind == VideoKind::Serial && item.episodes_count.is_none())
}

fn apply(item: &mut CatalogVideo, detail: &VideoDetail) {
    if item.genres.is_empty() && !detail.genres.is_empty() {
        item.genres = detail.genres.clone();
    }
    if item.countries.is_empty() && !detail.countries.is_empty() {
        item.countries = detail.countries.clone();
    }
    if item.episodes_count.is_none() {
        item.episodes_count = detail.episodes_count;
    }
    if item.iframe_url.is_none() {
        item.iframe_url = detail.iframe_url.clone();
    }
}

impl Enricher {
    pub fn new(provider: Arc<dyn CatalogProvider>, ttl: Duration, concurrency: usize) -> Self {
        Enricher {
            provider,
            cache: TtlCache::new(ttl),
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Defaults (6 h TTL, 6 in-flight lookups), overridable via
    /// ENRICH_TTL_SECS / ENRICH_CONCURRENCY.
    pub fn from_env(provider: Arc<dyn CatalogProvider>) -> Self {
        Self::new(
            provider,
            Duration::from_secs(env_parse("ENRICH_TTL_SECS", 21_600u64)),
            env_parse("ENRICH_CONCURRENCY", 6usize),
        )
    }

    /// Backfill missing secondary fields. Items without a kinopoisk id, or
    /// already complete, pass through untouched. Lookup failures leave the
    /// item with its pre-enrichment values; the batch never fails.
    pub async fn enrich(&self, mut items: Vec<CatalogVideo>) -> Vec<CatalogVideo> {
        // One lookup per kinopoisk id even when a batch repeats it.
        let mut to_fetch: Vec<(i64, Vec<usize>)> = Vec::new();
        for (idx, item) in items.iter_mut().enumerate() {
            if !needs_enrichment(item) {
                continue;
            }
            let Some(kp) = item.kinopoisk_id else { continue };
            match self.cache.get(&kp) {
                Some(entry) if entry.satisfies(item.kind) => {
                    apply(item, &entry.detail);
                }
                // Cache miss, or a hit lacking a kind-required field: fresh lookup.
                _ => match to_fetch.iter_mut().find(|(id, _)| *id == kp) {
                    Some((_, indices)) => indices.push(idx),
                    None => to_fetch.push((kp, vec![idx])),
                },
            }
        }
        if to_fetch.is_empty() {
            return items;
        }
        debug!(lookups = to_fetch.len(), batch = items.len(), "enrichment fan-out");

        let lookups = to_fetch.into_iter().map(|(kp, indices)| {
            let provider = Arc::clone(&self.provider);
            let limit = Arc::clone(&self.limit);
            async move {
                // Closed-semaphore is unreachable; treat it as a failed lookup.
                let Ok(_permit) = limit.acquire().await else {
                    return (kp, indices, EnrichmentEntry { failed: true, ..Default::default() });
                };
                let entry = match provider.detail(&DetailKey::Kinopoisk(kp)).await {
                    Ok(Some(detail)) => EnrichmentEntry { detail, failed: false },
                    Ok(None) => EnrichmentEntry { failed: true, ..Default::default() },
                    Err(err) => {
                        warn!(kp, error = %err, "detail lookup failed; caching negative entry");
                        EnrichmentEntry { failed: true, ..Default::default() }
                    }
                };
                (kp, indices, entry)
            }
        });
        for (kp, indices, entry) in join_all(lookups).await {
            for idx in indices {
                apply(&mut items[idx], &entry.detail);
            }
            self.cache.put(kp, entry);
        }
        items
    }
}
