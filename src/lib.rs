//! kinocat — video-catalog aggregation core.
//!
//! Aggregates metadata from mutually inconsistent upstream providers into
//! one searchable, linkable catalog: resumable sync with cross-batch
//! reconciliation, fuzzy search with graceful relevance degradation, bounded
//! enrichment and multi-strategy playable-link resolution. Routing, CLI and
//! page rendering live in the embedding application, not here.

pub mod cache;
pub mod core;
pub mod enrich;
pub mod error;
pub mod model;
pub mod provider;
pub mod reconcile;
pub mod resolve;
pub mod search;
pub mod store;
pub mod sync;
pub mod tracing;

pub mod util {
    pub mod env;
    pub mod json;
}

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::core::AggregationCore;
pub use crate::error::UpstreamError;
pub use crate::model::{
    CatalogVideo, RankedPage, ScoredVideo, SearchFilters, SyncMode, VideoDetail, VideoKind,
};
pub use crate::provider::{CatalogProvider, VcdnClient};
pub use crate::resolve::{Resolution, ResolveRequest, ResolvedLink};
pub use crate::store::{CatalogStore, PgCatalogStore};
pub use crate::sync::{SyncOptions, SyncReport};
