//! Incremental upstream supplementation for under-returning searches.
//!
//! When the store and the provider's own search return too few matches, the
//! scanner walks upstream listing pages through the ranking step, keeping
//! per-(query, filters) scan state so a repeated request resumes where the
//! previous one stopped instead of rescanning from page 1.

use std::time::Duration;

use tracing::{debug, warn};

use super::{rank_candidates, sort_ranked, TokenizedQuery};
use crate::cache::TtlCache;
use crate::model::{ScoredVideo, SearchFilters};
use crate::provider::CatalogProvider;
use crate::util::env::env_parse;

#[derive(Debug, Clone, Default)]
struct ScanState {
    /// Highest page already scanned; never rewinds within the TTL window,
    /// even if upstream's reported last page shifts between calls.
    scanned_to: i64,
    last_page: Option<i64>,
    matches: Vec<ScoredVideo>,
}

pub struct FuzzyScanner {
    state: TtlCache<String, ScanState>,
    page_budget: i64,
    match_cap: usize,
    page_size: i64,
}

impl FuzzyScanner {
    pub fn new(ttl: Duration, page_budget: i64, match_cap: usize, page_size: i64) -> Self {
        FuzzyScanner {
            state: TtlCache::new(ttl),
            page_budget,
            match_cap,
            page_size,
        }
    }

    /// Defaults, overridable via SCAN_TTL_SECS / SCAN_PAGE_BUDGET /
    /// SCAN_MATCH_CAP / SCAN_PAGE_SIZE.
    pub fn from_env() -> Self {
        Self::new(
            Duration::from_secs(env_parse("SCAN_TTL_SECS", 3600u64)),
            env_parse("SCAN_PAGE_BUDGET", 80i64),
            env_parse("SCAN_MATCH_CAP", 200usize),
            env_parse("SCAN_PAGE_SIZE", 100i64),
        )
    }

    /// Walk listing pages until `target` accumulated matches, the
    /// per-invocation page budget, or upstream's last page. Upstream failures
    /// end the walk early and return what has accumulated so far; the scan
    /// cursor keeps the progress already made.
    pub async fn supplement(
        &self,
        provider: &dyn CatalogProvider,
        query: &TokenizedQuery,
        filters: &SearchFilters,
        target: usize,
    ) -> Vec<ScoredVideo> {
        let key = format!("{}|{}", query.normalized, filters.fingerprint());
        let mut state = self.state.get(&key).unwrap_or_default();

        let mut pages_used = 0i64;
        while state.matches.len() < target && pages_used < self.page_budget {
            if let Some(last) = state.last_page {
                if state.scanned_to >= last {
                    break;
                }
            }
            let page = state.scanned_to + 1;
            let fetched = match provider.faceted(filters, page, self.page_size).await {
                Ok(p) => p,
                Err(err) => {
                    warn!(page, error = %err, "scan page fetch failed; returning accumulated matches");
                    break;
                }
            };
            pages_used += 1;
            // Monotonic: the cursor moves forward even when the reported
            // last page shrinks under us.
            state.scanned_to = state.scanned_to.max(page);
            if let Some(reported) = fetched.last_page {
                state.last_page = Some(reported);
            }

            let empty_page = fetched.items.is_empty();
            for hit in rank_candidates(vec![fetched.items], query) {
                if !state
                    .matches
                    .iter()
                    .any(|m| m.video.dedup_key() == hit.video.dedup_key())
                {
                    state.matches.push(hit);
                }
            }
            sort_ranked(&mut state.matches);
            state.matches.truncate(self.match_cap);

            if empty_page && state.last_page.is_none() {
                // No last-page signal and nothing returned: treat as the end.
                break;
            }
        }

        debug!(
            key,
            scanned_to = state.scanned_to,
            matches = state.matches.len(),
            "scan state persisted"
        );
        let out = state.matches.clone();
        self.state.put(key, state);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tokenize;
    use crate::testutil::{video, ScriptedProvider};

    fn scanner(budget: i64) -> FuzzyScanner {
        FuzzyScanner::new(Duration::from_secs(60), budget, 50, 10)
    }

    #[tokio::test]
    async fn resumes_from_persisted_scan_cursor() {
        let provider = ScriptedProvider {
            faceted_pages: vec![
                vec![video(1, "Левиафан", Some(2014))],
                vec![video(2, "Дурак", Some(2014))],
                vec![video(3, "Матрица", Some(1999))],
            ],
            reported_last_page: Some(3),
            ..Default::default()
        };
        let s = scanner(2);
        let q = tokenize("матрица");
        let filters = SearchFilters::default();

        let first = s.supplement(&provider, &q, &filters, 1).await;
        assert!(first.is_empty());
        // Second invocation resumes at page 3 instead of rescanning.
        let second = s.supplement(&provider, &q, &filters, 1).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].video.id, 3);
        assert_eq!(*provider.requested_pages.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stops_at_reported_last_page() {
        let provider = ScriptedProvider {
            faceted_pages: vec![vec![video(1, "Сталкер", Some(1979))], Vec::new()],
            reported_last_page: Some(2),
            ..Default::default()
        };
        let s = scanner(10);
        let q = tokenize("нет такого фильма вовсе");
        let out = s.supplement(&provider, &q, &SearchFilters::default(), 5).await;
        assert!(out.is_empty());
        assert_eq!(*provider.requested_pages.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn scan_cursor_never_rewinds_when_reported_last_page_shrinks() {
        let mut provider = ScriptedProvider {
            faceted_pages: vec![
                vec![video(1, "Левиафан", Some(2014))],
                vec![video(2, "Дурак", Some(2014))],
                vec![video(3, "Аритмия", Some(2017))],
            ],
            reported_last_page: Some(3),
            ..Default::default()
        };
        let s = scanner(2);
        let q = tokenize("матрица");
        let filters = SearchFilters::default();

        s.supplement(&provider, &q, &filters, 5).await;
        assert_eq!(*provider.requested_pages.lock().unwrap(), vec![1, 2]);

        // Upstream now claims the listing ends before the scanned-to cursor.
        provider.reported_last_page = Some(1);
        s.supplement(&provider, &q, &filters, 5).await;
        assert_eq!(*provider.requested_pages.lock().unwrap(), vec![1, 2, 3]);

        // Cursor stayed at page 3: nothing already scanned is re-requested.
        s.supplement(&provider, &q, &filters, 5).await;
        assert_eq!(*provider.requested_pages.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stops_once_target_reached_and_dedups() {
        let mut twin = video(1, "Матрица", Some(1999));
        twin.kinopoisk_id = Some(301);
        let mut twin2 = video(2, "Матрица", Some(1999));
        twin2.kinopoisk_id = Some(301);
        let provider = ScriptedProvider {
            faceted_pages: vec![vec![twin], vec![twin2], vec![video(3, "Матрица 2", Some(2003))]],
            reported_last_page: Some(3),
            ..Default::default()
        };
        let s = scanner(10);
        let q = tokenize("матрица");

        let out = s.supplement(&provider, &q, &SearchFilters::default(), 2).await;
        // Page 1 satisfied one match; page 2's twin deduped; page 3 finished.
        assert_eq!(out.len(), 2);
        assert_eq!(*provider.requested_pages.lock().unwrap(), vec![1, 2, 3]);
    }
}
