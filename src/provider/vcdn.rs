use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::{with_retry, CatalogProvider, DetailKey, ListFeed, ProviderPage};
use crate::error::UpstreamError;
use crate::model::{CatalogVideo, SearchFilters, VideoDetail, VideoKind};
use crate::util::env::{env_opt, env_parse, preflight_check};
use crate::util::json::find_embed_url;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        s.truncate(max_len);
        s.push('…');
    }
    s
}

/// VCDN-style catalog provider.
///
/// Endpoints (base): `/api/videos` listing with page/limit, `/api/video-updates`
/// for the recently-changed feed, the same listing endpoint addressable by
/// `kinopoisk_id`/`imdb_id` for single-item detail, `title=` for free-text
/// search and genre/country/year facets for filtered listing.
///
/// Payloads are duck-typed: field names vary per deployment ("title" vs
/// "ru_title", "iframe" vs "iframe_src", genres as strings or objects), so
/// every item goes through [`normalize_item`] here and the union-of-shapes
/// never escapes this module.
#[derive(Debug, Clone)]
pub struct VcdnClient {
    base_url: String,
    api_token: Option<String>,
    http: Client,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

impl VcdnClient {
    pub fn new(base_url: &str, api_token: Option<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("kinocat/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.filter(|s| !s.trim().is_empty()),
            http,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(300),
        })
    }

    /// Construct from env: VCDN_BASE_URL, VCDN_API_TOKEN, VCDN_TIMEOUT_SECS,
    /// VCDN_MAX_RETRIES, VCDN_BACKOFF_MS.
    pub fn from_env() -> anyhow::Result<Self> {
        preflight_check(
            "vcdn",
            &[],
            &["VCDN_BASE_URL", "VCDN_API_TOKEN", "VCDN_TIMEOUT_SECS"],
        )?;
        let base = env_opt("VCDN_BASE_URL").unwrap_or_else(|| "https://videocdn.tv".into());
        let timeout: u64 = env_parse("VCDN_TIMEOUT_SECS", 15u64);
        let mut client = Self::new(&base, env_opt("VCDN_API_TOKEN"), timeout)?;
        client.retry_attempts = env_parse("VCDN_MAX_RETRIES", 3u32);
        client.retry_base_delay = Duration::from_millis(env_parse("VCDN_BACKOFF_MS", 300u64));
        Ok(client)
    }

    fn add_auth_query(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_token.as_deref() {
            Some(token) => req.query(&[("api_token", token)]),
            None => req,
        }
    }

    /// One GET with status classification. `Ok(None)` means 404.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let req = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(query);
        let resp = self.add_auth_query(req).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
            return Err(UpstreamError::from_status(status, body));
        }
        match resp.json::<Value>().await {
            Ok(body) => Ok(Some(body)),
            Err(err) => {
                // Schema drift / HTML error pages: degrade to empty, keep syncing.
                warn!(url, error = %err, "malformed upstream body; treating as empty");
                Ok(None)
            }
        }
    }

    async fn fetch_page(
        &self,
        path: &str,
        mut query: Vec<(&str, String)>,
        page: i64,
        page_size: i64,
    ) -> Result<ProviderPage, UpstreamError> {
        query.push(("page", page.to_string()));
        query.push(("limit", page_size.to_string()));
        let what = format!("vcdn {path} page {page}");
        let body = with_retry(&what, self.retry_attempts, self.retry_base_delay, || {
            self.get_json(path, &query)
        })
        .await?;
        let page = body.as_ref().map(parse_list_body).unwrap_or_default();
        debug!(what, items = page.items.len(), last_page = ?page.last_page, "fetched listing page");
        Ok(page)
    }
}

/// Listing bodies come either wrapped (`{"data": [...], "last_page": N}`) or
/// as a bare array. Anything else is an empty page.
fn parse_list_body(body: &Value) -> ProviderPage {
    let (items_raw, last_page) = match body {
        Value::Array(arr) => (arr.as_slice(), None),
        Value::Object(map) => {
            let items = map
                .get("data")
                .or_else(|| map.get("items"))
                .or_else(|| map.get("results"))
                .and_then(|v| v.as_array())
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            let last = map
                .get("last_page")
                .or_else(|| map.get("total_pages"))
                .and_then(Value::as_i64);
            (items, last)
        }
        _ => (&[] as &[Value], None),
    };
    ProviderPage {
        items: items_raw.iter().filter_map(normalize_item).collect(),
        last_page,
    }
}

fn first_str<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

fn first_i64(obj: &Value, keys: &[&str]) -> Option<i64> {
    for k in keys {
        if let Some(v) = obj.get(*k) {
            if let Some(n) = v.as_i64() {
                return Some(n);
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

fn first_f64(obj: &Value, keys: &[&str]) -> Option<f64> {
    for k in keys {
        if let Some(v) = obj.get(*k) {
            if let Some(n) = v.as_f64() {
                return Some(n);
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

/// Name lists arrive as `["драма"]`, `[{"title": "драма"}]`, `[{"name": ..}]`
/// or a comma-joined string depending on the deployment.
fn name_set(obj: &Value, keys: &[&str]) -> Vec<String> {
    for k in keys {
        match obj.get(*k) {
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let name = item
                        .as_str()
                        .or_else(|| item.get("title").and_then(Value::as_str))
                        .or_else(|| item.get("name").and_then(Value::as_str));
                    if let Some(name) = name {
                        let name = name.trim();
                        if !name.is_empty() && !out.iter().any(|x: &String| x == name) {
                            out.push(name.to_string());
                        }
                    }
                }
                if !out.is_empty() {
                    return out;
                }
            }
            Some(Value::String(s)) if !s.trim().is_empty() => {
                return s
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

fn normalize_url(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        raw.to_string()
    }
}

fn parse_year(obj: &Value) -> Option<i32> {
    if let Some(y) = first_i64(obj, &["year"]) {
        return i32::try_from(y).ok();
    }
    first_str(obj, &["released", "release_date", "premiere"])
        .and_then(|d| d.get(0..4))
        .and_then(|y| y.parse().ok())
}

/// Normalize one raw listing/search item into the internal schema. Items
/// without a usable id or title are dropped.
pub(crate) fn normalize_item(obj: &Value) -> Option<CatalogVideo> {
    if !obj.is_object() {
        return None;
    }
    let id = first_i64(obj, &["id", "video_id"])?;
    let title = first_str(obj, &["title", "ru_title", "name"])?.trim().to_string();

    let kind = first_str(obj, &["content_type", "type", "kind"])
        .and_then(VideoKind::from_str_loose)
        .unwrap_or_else(|| {
            // Serial payloads carry season/episode structure even when the
            // type label is missing.
            if obj.get("seasons").is_some() || obj.get("episodes_count").is_some() {
                VideoKind::Serial
            } else {
                VideoKind::Movie
            }
        });

    let mut video = CatalogVideo::bare(id, kind, title);
    video.kinopoisk_id = first_i64(obj, &["kinopoisk_id", "kp_id"]);
    video.imdb_id = first_str(obj, &["imdb_id"]).map(|s| s.trim().to_string());
    video.orig_title = first_str(obj, &["orig_title", "en_title", "original_name"])
        .map(|s| s.trim().to_string());
    video.year = parse_year(obj);
    video.poster_url = first_str(obj, &["poster", "poster_url", "image"]).map(normalize_url);
    video.iframe_url = first_str(obj, &["iframe", "iframe_src", "embed_url"])
        .map(normalize_url)
        .or_else(|| find_embed_url(obj).map(normalize_url));
    video.genres = name_set(obj, &["genres", "genre"]);
    video.countries = name_set(obj, &["countries", "country"]);
    video.episodes_count = first_i64(obj, &["episodes_count", "episodes"])
        .and_then(|n| i32::try_from(n).ok());
    if let Some(created) = first_str(obj, &["created_at", "added_at"])
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
    {
        video.created_at = created.with_timezone(&chrono::Utc);
    }
    if let Some(updated) = first_str(obj, &["updated_at"])
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
    {
        video.updated_at = updated.with_timezone(&chrono::Utc);
    }
    Some(video)
}

fn parse_detail_body(body: &Value) -> Option<VideoDetail> {
    // Detail responses reuse the listing envelope with a single-item data
    // array, or return the object directly.
    let obj = match body {
        Value::Object(map) if map.contains_key("data") => {
            match map.get("data") {
                Some(Value::Array(items)) => items.first()?,
                Some(v) if v.is_object() => v,
                _ => return None,
            }
        }
        Value::Array(items) => items.first()?,
        v if v.is_object() => v,
        _ => return None,
    };
    if !obj.is_object() {
        return None;
    }
    Some(VideoDetail {
        genres: name_set(obj, &["genres", "genre"]),
        countries: name_set(obj, &["countries", "country"]),
        kinopoisk_rating: first_f64(obj, &["kinopoisk_rating", "kp_rating", "kinopoisk"]),
        imdb_rating: first_f64(obj, &["imdb_rating", "imdb"]),
        episodes_count: first_i64(obj, &["episodes_count", "episodes"])
            .and_then(|n| i32::try_from(n).ok()),
        iframe_url: first_str(obj, &["iframe", "iframe_src", "embed_url"])
            .map(normalize_url)
            .or_else(|| find_embed_url(obj).map(normalize_url)),
    })
}

#[async_trait::async_trait]
impl CatalogProvider for VcdnClient {
    fn name(&self) -> &'static str {
        "vcdn"
    }

    async fn list_page(
        &self,
        feed: ListFeed,
        page: i64,
        page_size: i64,
    ) -> Result<ProviderPage, UpstreamError> {
        let path = match feed {
            ListFeed::Updates => "/api/video-updates",
            ListFeed::Full => "/api/videos",
        };
        self.fetch_page(path, Vec::new(), page, page_size).await
    }

    async fn detail(&self, key: &DetailKey) -> Result<Option<VideoDetail>, UpstreamError> {
        let query: Vec<(&str, String)> = match key {
            DetailKey::Kinopoisk(id) => vec![("kinopoisk_id", id.to_string())],
            DetailKey::Imdb(id) => vec![("imdb_id", id.clone())],
        };
        let what = format!("vcdn detail {key:?}");
        let body = with_retry(&what, self.retry_attempts, self.retry_base_delay, || {
            self.get_json("/api/videos", &query)
        })
        .await?;
        Ok(body.as_ref().and_then(parse_detail_body))
    }

    async fn search(&self, query: &str) -> Result<Vec<CatalogVideo>, UpstreamError> {
        let q: Vec<(&str, String)> = vec![("title", query.to_string())];
        let what = format!("vcdn search {:?}", truncate_for_log(query.to_string(), 60));
        let body = with_retry(&what, self.retry_attempts, self.retry_base_delay, || {
            self.get_json("/api/videos", &q)
        })
        .await?;
        Ok(body.as_ref().map(parse_list_body).unwrap_or_default().items)
    }

    async fn faceted(
        &self,
        filters: &SearchFilters,
        page: i64,
        page_size: i64,
    ) -> Result<ProviderPage, UpstreamError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(kind) = filters.kind {
            query.push(("content_type", kind.as_str().to_string()));
        }
        if let Some(genre) = &filters.genre {
            query.push(("genre", genre.clone()));
        }
        if let Some(country) = &filters.country {
            query.push(("country", country.clone()));
        }
        if let Some(year) = filters.year {
            query.push(("year", year.to_string()));
        }
        self.fetch_page("/api/videos", query, page, page_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_alternate_field_spellings() {
        let raw = json!({
            "id": "512",
            "kp_id": 301,
            "ru_title": "Матрица",
            "en_title": "The Matrix",
            "released": "1999-03-31",
            "type": "movie",
            "poster": "//img.example/p.jpg",
            "genres": [{"title": "фантастика"}, {"title": "боевик"}],
            "country": "США, Австралия"
        });
        let v = normalize_item(&raw).expect("item should normalize");
        assert_eq!(v.id, 512);
        assert_eq!(v.kinopoisk_id, Some(301));
        assert_eq!(v.title, "Матрица");
        assert_eq!(v.orig_title.as_deref(), Some("The Matrix"));
        assert_eq!(v.year, Some(1999));
        assert_eq!(v.poster_url.as_deref(), Some("https://img.example/p.jpg"));
        assert_eq!(v.genres, vec!["фантастика", "боевик"]);
        assert_eq!(v.countries, vec!["США", "Австралия"]);
    }

    #[test]
    fn infers_serial_kind_from_structure() {
        let raw = json!({ "id": 9, "title": "Шерлок", "episodes_count": 13 });
        let v = normalize_item(&raw).unwrap();
        assert_eq!(v.kind, VideoKind::Serial);
        assert_eq!(v.episodes_count, Some(13));
    }

    #[test]
    fn drops_items_without_id_or_title() {
        assert!(normalize_item(&json!({ "title": "безымянный" })).is_none());
        assert!(normalize_item(&json!({ "id": 4 })).is_none());
        assert!(normalize_item(&json!("just a string")).is_none());
    }

    #[test]
    fn list_body_accepts_wrapped_and_bare_shapes() {
        let wrapped = json!({
            "data": [{"id": 1, "title": "а"}, {"id": 2, "title": "б"}],
            "last_page": 44
        });
        let page = parse_list_body(&wrapped);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.last_page, Some(44));

        let bare = json!([{"id": 3, "title": "в"}]);
        let page = parse_list_body(&bare);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.last_page, None);

        // Schema drift degrades to an empty page, never an error.
        let drifted = json!({ "error": "maintenance" });
        assert!(parse_list_body(&drifted).items.is_empty());
    }

    #[test]
    fn detail_digs_embed_url_out_of_nested_payload() {
        let body = json!({
            "data": [{
                "genres": ["драма"],
                "kinopoisk": "8.6",
                "media": { "player": { "iframe_src": "//player.example/e/42" } }
            }]
        });
        let d = parse_detail_body(&body).unwrap();
        assert_eq!(d.kinopoisk_rating, Some(8.6));
        assert_eq!(d.iframe_url.as_deref(), Some("https://player.example/e/42"));
    }
}
