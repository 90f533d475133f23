//! Internal record schema. Upstream payloads are normalized into these types
//! at the adapter boundary; nothing downstream ever sees a raw provider shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog entry variant. Immutable once a record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoKind {
    Movie,
    Serial,
}

impl VideoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoKind::Movie => "movie",
            VideoKind::Serial => "serial",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movie" | "film" | "anime" => Some(VideoKind::Movie),
            "serial" | "series" | "tv-series" | "anime-serial" | "show" => Some(VideoKind::Serial),
            _ => None,
        }
    }
}

/// One normalized catalog record.
///
/// `id` is the provider-scoped primary id and is unique within one provider
/// table. `kinopoisk_id` / `imdb_id` are cross-reference ids shared across
/// providers; they are NOT unique and are only used for best-effort joining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogVideo {
    pub id: i64,
    pub kinopoisk_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub kind: VideoKind,
    pub title: String,
    pub orig_title: Option<String>,
    pub year: Option<i32>,
    pub poster_url: Option<String>,
    pub iframe_url: Option<String>,
    pub genres: Vec<String>,
    pub countries: Vec<String>,
    pub episodes_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogVideo {
    /// Minimal record used as a base when an adapter only has an id and title.
    pub fn bare(id: i64, kind: VideoKind, title: impl Into<String>) -> Self {
        let now = Utc::now();
        CatalogVideo {
            id,
            kinopoisk_id: None,
            imdb_id: None,
            kind,
            title: title.into(),
            orig_title: None,
            year: None,
            poster_url: None,
            iframe_url: None,
            genres: Vec::new(),
            countries: Vec::new(),
            episodes_count: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Dedup key: cross-reference id when present, else the primary id
    /// namespaced so it never collides with a kinopoisk id.
    pub fn dedup_key(&self) -> String {
        match self.kinopoisk_id {
            Some(kp) => format!("kp:{kp}"),
            None => format!("own:{}", self.id),
        }
    }
}

/// Secondary attributes fetched from a per-id detail lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoDetail {
    pub genres: Vec<String>,
    pub countries: Vec<String>,
    pub kinopoisk_rating: Option<f64>,
    pub imdb_rating: Option<f64>,
    pub episodes_count: Option<i32>,
    pub iframe_url: Option<String>,
}

/// Sync feed selector. `Recent` reads the updates feed statelessly; `Full`
/// walks the whole listing with a persisted resumable cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    Recent,
    Full,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Recent => "recent",
            SyncMode::Full => "full",
        }
    }
}

/// Faceted search filters. The fingerprint keys caches and scan state, so it
/// must be stable across semantically equal filter sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub kind: Option<VideoKind>,
    pub genre: Option<String>,
    pub country: Option<String>,
    pub year: Option<i32>,
}

impl SearchFilters {
    pub fn fingerprint(&self) -> String {
        format!(
            "k={};g={};c={};y={}",
            self.kind.map(|k| k.as_str()).unwrap_or("-"),
            self.genre.as_deref().unwrap_or("-").to_lowercase(),
            self.country.as_deref().unwrap_or("-").to_lowercase(),
            self.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.genre.is_none() && self.country.is_none() && self.year.is_none()
    }
}

/// A candidate record with its relevance score attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredVideo {
    pub video: CatalogVideo,
    pub score: f64,
    /// Fraction of query tokens found in the matched title (1.0 = full
    /// coverage). The strict relevance tier requires full coverage.
    pub coverage: f64,
}

/// One page of ranked search output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPage {
    pub items: Vec<ScoredVideo>,
    pub page: i64,
    pub limit: i64,
    pub total_ranked: usize,
    /// Which relevance tier produced the page: 0 = strict, higher = relaxed,
    /// last tier = unfiltered ranked set.
    pub relaxation_tier: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_provider_spellings() {
        assert_eq!(VideoKind::from_str_loose("tv-series"), Some(VideoKind::Serial));
        assert_eq!(VideoKind::from_str_loose("Film"), Some(VideoKind::Movie));
        assert_eq!(VideoKind::from_str_loose("podcast"), None);
    }

    #[test]
    fn fingerprint_ignores_case_and_is_stable() {
        let a = SearchFilters {
            genre: Some("Драма".into()),
            ..Default::default()
        };
        let b = SearchFilters {
            genre: Some("драма".into()),
            ..Default::default()
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn dedup_key_prefers_cross_reference_id() {
        let mut v = CatalogVideo::bare(10, VideoKind::Movie, "x");
        assert_eq!(v.dedup_key(), "own:10");
        v.kinopoisk_id = Some(301);
        assert_eq!(v.dedup_key(), "kp:301");
    }
}
