//! Generic depth-bounded walk over uncertain upstream JSON.
//!
//! Several providers bury the embed/player URL at unpredictable depths and
//! under varying key names. Instead of per-caller ad hoc digging, one walk
//! returns the first string leaf accepted by the caller's predicate.

use serde_json::Value;

/// Depth-first walk returning the first string leaf where `pred(key, value)`
/// holds. Array elements inherit the key of their enclosing field. The walk
/// gives up below `max_depth` so a pathological payload cannot recurse
/// unboundedly.
pub fn find_string_leaf<'a, F>(root: &'a Value, pred: &F, max_depth: usize) -> Option<&'a str>
where
    F: Fn(&str, &str) -> bool,
{
    fn walk<'a, F>(node: &'a Value, key: &str, depth: usize, pred: &F) -> Option<&'a str>
    where
        F: Fn(&str, &str) -> bool,
    {
        if depth == 0 {
            return None;
        }
        match node {
            Value::String(s) => {
                if pred(key, s) {
                    Some(s.as_str())
                } else {
                    None
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    if let Some(hit) = walk(v, k, depth - 1, pred) {
                        return Some(hit);
                    }
                }
                None
            }
            Value::Array(items) => {
                for v in items {
                    if let Some(hit) = walk(v, key, depth - 1, pred) {
                        return Some(hit);
                    }
                }
                None
            }
            _ => None,
        }
    }
    walk(root, "", max_depth, pred)
}

/// First leaf that looks like a playable embed link: URL-shaped value under a
/// key a provider would use for one.
pub fn find_embed_url(root: &Value) -> Option<&str> {
    const KEYS: [&str; 5] = ["iframe", "iframe_src", "link", "src", "url"];
    find_string_leaf(
        root,
        &|key: &str, value: &str| {
            let k = key.to_ascii_lowercase();
            KEYS.iter().any(|want| k.contains(want))
                && (value.starts_with("http://")
                    || value.starts_with("https://")
                    || value.starts_with("//"))
        },
        8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_nested_embed_url() {
        let payload = json!({
            "data": [{
                "title": "Матрица",
                "media": { "player": { "iframe_src": "//player.example/e/42" } }
            }]
        });
        assert_eq!(find_embed_url(&payload), Some("//player.example/e/42"));
    }

    #[test]
    fn ignores_non_url_values_under_url_keys() {
        let payload = json!({ "link": "not-a-url", "meta": { "url": "https://ok.example" } });
        assert_eq!(find_embed_url(&payload), Some("https://ok.example"));
    }

    #[test]
    fn respects_depth_bound() {
        let deep = json!({ "a": { "b": { "c": { "url": "https://deep.example" } } } });
        let pred = |k: &str, _v: &str| k == "url";
        assert!(find_string_leaf(&deep, &pred, 2).is_none());
        assert!(find_string_leaf(&deep, &pred, 8).is_some());
    }
}
