//! Record reconciliation: merging two partial records for the same logical
//! entity. Scalars coalesce with the existing value preferred; set-valued
//! fields take the union. The SQL upsert's conflict clause mirrors these
//! rules so in-batch dedup and upsert-time resolution agree.

use crate::model::CatalogVideo;

/// Union of two string sets, preserving first-occurrence order.
pub fn union_sets(a: &[String], b: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(a.len() + b.len());
    for s in a.iter().chain(b.iter()) {
        if !out.iter().any(|x| x.eq_ignore_ascii_case(s)) {
            out.push(s.clone());
        }
    }
    out
}

/// Merge `incoming` into `existing`.
///
/// Identity (`id`) and `kind` are immutable post-creation and always come
/// from `existing`. Scalar fields are first-non-null-wins with `existing`
/// preferred; `genres`/`countries` union. `updated_at` takes the later of
/// the two, `created_at` the earlier.
pub fn merge(existing: &CatalogVideo, incoming: &CatalogVideo) -> CatalogVideo {
    CatalogVideo {
        id: existing.id,
        kind: existing.kind,
        kinopoisk_id: existing.kinopoisk_id.or(incoming.kinopoisk_id),
        imdb_id: existing.imdb_id.clone().or_else(|| incoming.imdb_id.clone()),
        title: if existing.title.trim().is_empty() {
            incoming.title.clone()
        } else {
            existing.title.clone()
        },
        orig_title: existing
            .orig_title
            .clone()
            .or_else(|| incoming.orig_title.clone()),
        year: existing.year.or(incoming.year),
        poster_url: existing
            .poster_url
            .clone()
            .or_else(|| incoming.poster_url.clone()),
        iframe_url: existing
            .iframe_url
            .clone()
            .or_else(|| incoming.iframe_url.clone()),
        genres: union_sets(&existing.genres, &incoming.genres),
        countries: union_sets(&existing.countries, &incoming.countries),
        episodes_count: existing.episodes_count.or(incoming.episodes_count),
        created_at: existing.created_at.min(incoming.created_at),
        updated_at: existing.updated_at.max(incoming.updated_at),
    }
}

/// Collapse raw provider records sharing an id into one record each,
/// preserving the order of first appearance. Upstream pages occasionally
/// repeat an id with different partial payloads; the store must never see
/// two conflicting writes for one id within a batch.
pub fn dedup_batch(batch: Vec<CatalogVideo>) -> Vec<CatalogVideo> {
    use std::collections::HashMap;
    let mut order: Vec<i64> = Vec::with_capacity(batch.len());
    let mut merged: HashMap<i64, CatalogVideo> = HashMap::with_capacity(batch.len());
    for v in batch {
        match merged.get_mut(&v.id) {
            Some(cur) => *cur = merge(cur, &v),
            None => {
                order.push(v.id);
                merged.insert(v.id, v);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| merged.remove(&id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VideoKind;

    fn sample(id: i64) -> CatalogVideo {
        let mut v = CatalogVideo::bare(id, VideoKind::Movie, "Интерстеллар");
        v.year = Some(2014);
        v.genres = vec!["фантастика".into(), "драма".into()];
        v
    }

    #[test]
    fn merge_is_idempotent() {
        let x = sample(1);
        let m = merge(&x, &x);
        assert_eq!(m.year, x.year);
        assert_eq!(m.genres, x.genres);
        assert_eq!(m.title, x.title);
        assert_eq!(m.kinopoisk_id, x.kinopoisk_id);
    }

    #[test]
    fn scalars_prefer_existing_and_never_regress_to_null() {
        let mut a = sample(1);
        a.year = Some(2014);
        let mut b = sample(1);
        b.year = None;
        b.poster_url = Some("https://img.example/p.jpg".into());

        let m = merge(&a, &b);
        assert_eq!(m.year, Some(2014));
        assert_eq!(m.poster_url.as_deref(), Some("https://img.example/p.jpg"));

        // Reverse direction: existing null is filled, existing value kept.
        let m2 = merge(&b, &a);
        assert_eq!(m2.year, Some(2014));
    }

    #[test]
    fn set_union_is_commutative_and_associative() {
        let mut a = sample(1);
        a.genres = vec!["драма".into()];
        let mut b = sample(1);
        b.genres = vec!["фантастика".into()];
        let mut c = sample(1);
        c.genres = vec!["драма".into(), "приключения".into()];

        let sort = |mut v: Vec<String>| {
            v.sort();
            v
        };
        let ab = merge(&a, &b);
        let ba = merge(&b, &a);
        assert_eq!(sort(ab.genres.clone()), sort(ba.genres.clone()));

        let ab_c = merge(&ab, &c);
        let bc = merge(&b, &c);
        let a_bc = merge(&a, &bc);
        assert_eq!(sort(ab_c.genres), sort(a_bc.genres));
    }

    #[test]
    fn identity_and_kind_are_immutable() {
        let a = sample(1);
        let mut b = sample(1);
        b.kind = VideoKind::Serial;
        let m = merge(&a, &b);
        assert_eq!(m.kind, VideoKind::Movie);
        assert_eq!(m.id, 1);
    }

    #[test]
    fn dedup_batch_collapses_repeated_ids_in_order() {
        let mut first = sample(7);
        first.year = None;
        let mut second = sample(7);
        second.year = Some(2014);
        let other = sample(3);

        let out = dedup_batch(vec![first, other, second]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, 7);
        assert_eq!(out[0].year, Some(2014));
        assert_eq!(out[1].id, 3);
    }
}
