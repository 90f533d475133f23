//! Fuzzy text matching, scoring and ranking with graceful relevance
//! degradation.
//!
//! Providers disagree on spelling, word order and transliteration, and users
//! typo. The engine therefore never demands exact matches: queries are
//! normalized and tokenized, candidates are scored by weighted token overlap
//! with a prefix/similarity fallback, and a relevance floor is relaxed tier
//! by tier instead of returning an empty page.

pub mod scanner;

use itertools::Itertools;
use strsim::jaro_winkler;

use crate::model::{CatalogVideo, ScoredVideo, SearchFilters};

const EXACT_SCORE: f64 = 1000.0;
const SUBSTRING_BONUS: f64 = 400.0;
const TOKEN_WEIGHT: f64 = 10.0;
const POSITION_BONUS: f64 = 50.0;
const FUZZY_WEIGHT: f64 = 0.4;
const FUZZY_SIMILARITY: f64 = 0.88;
pub const YEAR_BONUS: f64 = 120.0;

const MAX_TOKENS: usize = 6;
const MIN_TOKEN_LEN: usize = 2;

/// Words too common to carry relevance on their own.
const STOP_WORDS: [&str; 24] = [
    "и", "в", "во", "не", "на", "с", "со", "а", "но", "да", "к", "у", "же", "за", "по", "из",
    "о", "the", "a", "an", "of", "and", "or", "in",
];

/// Fold a lowercased letter to its bare form: ё→е, Latin-1/Latin-Extended
/// diacritics to the base letter. Original titles are frequently typed
/// without accents, so «Léon» and "leon" must normalize identically.
fn fold_char(low: char) -> char {
    match low {
        'ё' => 'е',
        'à'..='å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'è'..='ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'ì'..='ï' | 'ī' | 'į' => 'i',
        'ð' | 'ď' | 'đ' => 'd',
        'ñ' | 'ń' | 'ň' => 'n',
        'ò'..='ö' | 'ø' | 'ō' | 'ő' => 'o',
        'ù'..='ü' | 'ū' | 'ů' | 'ű' => 'u',
        'ý' | 'ÿ' => 'y',
        'ś' | 'š' => 's',
        'ł' => 'l',
        'ř' => 'r',
        'ť' => 't',
        'ź' | 'ż' | 'ž' => 'z',
        _ => low,
    }
}

/// Lowercase, fold ё→е and Latin diacritics, strip punctuation/symbols,
/// collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for low in ch.to_lowercase() {
                out.push(fold_char(low));
            }
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().join(" ")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenizedQuery {
    pub normalized: String,
    pub tokens: Vec<String>,
    pub year: Option<i32>,
}

impl TokenizedQuery {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Normalize and split a query. A 4-digit token in [1900, 2099] becomes the
/// year hint and is excluded from the text tokens. Stop-words and sub-2-char
/// tokens are dropped unless that would empty the set, in which case the
/// unfiltered split is kept. Capped at 6 tokens.
pub fn tokenize(text: &str) -> TokenizedQuery {
    let normalized = normalize(text);
    let mut year: Option<i32> = None;
    let mut raw: Vec<String> = Vec::new();
    for token in normalized.split_whitespace() {
        if year.is_none() && token.len() == 4 {
            if let Ok(y) = token.parse::<i32>() {
                if (1900..=2099).contains(&y) {
                    year = Some(y);
                    continue;
                }
            }
        }
        raw.push(token.to_string());
    }

    let filtered: Vec<String> = raw
        .iter()
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN && !STOP_WORDS.contains(&t.as_str()))
        .cloned()
        .collect();
    let mut tokens = if filtered.is_empty() { raw } else { filtered };
    tokens.truncate(MAX_TOKENS);

    // The normalized form with the year removed, for whole-string comparison.
    let normalized = {
        let mut text_only: Vec<&str> = normalized.split_whitespace().collect();
        if let Some(y) = year {
            let y = y.to_string();
            if let Some(pos) = text_only.iter().position(|t| **t == *y) {
                text_only.remove(pos);
            }
        }
        text_only.join(" ")
    };

    TokenizedQuery {
        normalized,
        tokens,
        year,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MatchScore {
    pub matched: bool,
    pub score: f64,
    /// found tokens / query tokens.
    pub coverage: f64,
}

fn prefix3(token: &str) -> Option<String> {
    let prefix: String = token.chars().take(3).collect();
    (token.chars().count() > 3).then_some(prefix)
}

/// Score one haystack against a tokenized query.
///
/// Exact equality is the top tier; full substring containment earns a fixed
/// bonus on top of token scores. Otherwise at least
/// `max(2, ceil(0.6 × tokens))` tokens must be found (all of them when the
/// query has ≤ 2); found tokens score by length with a bonus at position 0,
/// and a 3-char-prefix / Jaro-Winkler fallback at reduced weight tolerates
/// typos and inflected endings.
pub fn is_match(haystack: &str, query: &TokenizedQuery) -> MatchScore {
    let hay = normalize(haystack);
    if hay.is_empty() || query.is_empty() {
        return MatchScore::default();
    }

    if hay == query.normalized {
        return MatchScore {
            matched: true,
            score: EXACT_SCORE,
            coverage: 1.0,
        };
    }

    let hay_tokens: Vec<&str> = hay.split_whitespace().collect();
    let mut score = 0.0;
    let mut found = 0usize;
    for token in &query.tokens {
        let weight = token.chars().count() as f64 * TOKEN_WEIGHT;
        if hay.contains(token.as_str()) {
            found += 1;
            score += weight;
            if hay.starts_with(token.as_str()) {
                score += POSITION_BONUS;
            }
            continue;
        }
        let fuzzy_hit = prefix3(token).is_some_and(|p| hay.contains(&p))
            || hay_tokens
                .iter()
                .any(|h| jaro_winkler(h, token) >= FUZZY_SIMILARITY);
        if fuzzy_hit {
            found += 1;
            score += weight * FUZZY_WEIGHT;
        }
    }

    let total = query.tokens.len();
    let needed = if total <= 2 {
        total
    } else {
        ((total as f64 * 0.6).ceil() as usize).max(2)
    };
    let coverage = found as f64 / total as f64;
    if found < needed {
        return MatchScore {
            matched: false,
            score,
            coverage,
        };
    }

    if hay.contains(&query.normalized) {
        score += SUBSTRING_BONUS;
    }
    MatchScore {
        matched: true,
        score,
        coverage,
    }
}

/// Score a record: best of localized and original title, plus the year-hint
/// bonus when the record's year equals the extracted hint.
pub fn score_video(video: &CatalogVideo, query: &TokenizedQuery) -> MatchScore {
    let by_title = is_match(&video.title, query);
    let by_orig = video
        .orig_title
        .as_deref()
        .map(|t| is_match(t, query))
        .unwrap_or_default();
    let mut best = if by_orig.score > by_title.score {
        by_orig
    } else {
        by_title
    };
    if best.matched && query.year.is_some() && video.year == query.year {
        best.score += YEAR_BONUS;
    }
    best
}

/// Merge candidate sources, dedup by cross-reference id (first occurrence
/// wins), keep matched candidates only and rank: score desc, year desc, id
/// desc as the stable tie-break.
pub fn rank_candidates(sources: Vec<Vec<CatalogVideo>>, query: &TokenizedQuery) -> Vec<ScoredVideo> {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut ranked: Vec<ScoredVideo> = Vec::new();
    for video in sources.into_iter().flatten() {
        if !seen.insert(video.dedup_key()) {
            continue;
        }
        let m = score_video(&video, query);
        if m.matched {
            ranked.push(ScoredVideo {
                video,
                score: m.score,
                coverage: m.coverage,
            });
        }
    }
    sort_ranked(&mut ranked);
    ranked
}

pub(crate) fn sort_ranked(ranked: &mut [ScoredVideo]) {
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.video.year.cmp(&a.video.year))
            .then_with(|| b.video.id.cmp(&a.video.id))
    });
}

fn contains_ci(set: &[String], want: &str) -> bool {
    set.iter().any(|s| s.eq_ignore_ascii_case(want) || normalize(s) == normalize(want))
}

fn filters_match(video: &CatalogVideo, filters: &SearchFilters) -> bool {
    if let Some(kind) = filters.kind {
        if video.kind != kind {
            return false;
        }
    }
    if let Some(genre) = &filters.genre {
        if !contains_ci(&video.genres, genre) {
            return false;
        }
    }
    if let Some(country) = &filters.country {
        if !contains_ci(&video.countries, country) {
            return false;
        }
    }
    if let Some(year) = filters.year {
        if video.year != Some(year) {
            return false;
        }
    }
    true
}

/// Relevance floor with graceful relaxation.
///
/// Tier 0: caller filters all satisfied AND full token coverage. Tier 1:
/// filters satisfied at any coverage. Tier 2: only the kind filter kept.
/// Tier 3: the unfiltered ranked set. The first tier reaching `target`
/// results wins; tier 3 is returned regardless of count, so a caller always
/// gets some ranked output rather than an empty page purely due to an overly
/// strict filter.
pub fn apply_relevance_floor(
    ranked: &[ScoredVideo],
    filters: &SearchFilters,
    target: usize,
) -> (Vec<ScoredVideo>, u8) {
    let tiers: [&dyn Fn(&ScoredVideo) -> bool; 3] = [
        &|s: &ScoredVideo| s.coverage >= 1.0 && filters_match(&s.video, filters),
        &|s: &ScoredVideo| filters_match(&s.video, filters),
        &|s: &ScoredVideo| {
            filters
                .kind
                .map(|k| s.video.kind == k)
                .unwrap_or(true)
        },
    ];
    for (tier, keep) in tiers.iter().enumerate() {
        let kept: Vec<ScoredVideo> = ranked.iter().filter(|s| keep(s)).cloned().collect();
        if kept.len() >= target && !kept.is_empty() {
            return (kept, tier as u8);
        }
    }
    (ranked.to_vec(), 3)
}
