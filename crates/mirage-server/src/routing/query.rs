//! Query string parsing and volatile parameter filtering.

use std::collections::{BTreeSet, HashMap};

/// Parse a query string into a map. Values are percent-decoded; later
/// duplicates win.
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                params.insert(decode(key), decode(value));
            } else if !pair.is_empty() {
                params.insert(decode(pair), String::new());
            }
        }
    }
    params
}

/// Split a query on `&`, drop parameters whose name contains any of the
/// `volatile` fragments, and return the remaining `name=value` pairs as a set.
///
/// Applied the same way to request queries and declared route queries.
pub fn stable_params(query: Option<&str>, volatile: &[String]) -> BTreeSet<String> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let name = decode(name);
            if volatile.iter().any(|v| !v.is_empty() && name.contains(v.as_str())) {
                return None;
            }
            Some(format!("{}={}", name, decode(value)))
        })
        .collect()
}

fn decode(s: &str) -> String {
    let s = s.replace('+', " ");
    urlencoding::decode(&s)
        .map(|d| d.into_owned())
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volatile() -> Vec<String> {
        vec!["ts".to_string(), "lat".to_string()]
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string(Some("name=John%20Doe&flag&empty="));
        assert_eq!(params.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(params.get("flag"), Some(&String::new()));
        assert_eq!(params.get("empty"), Some(&String::new()));
        assert!(parse_query_string(None).is_empty());
    }

    #[test]
    fn test_volatile_names_are_dropped() {
        let set = stable_params(Some("type=b&ts=123&user_lat=1.0"), &volatile());
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["type=b"]);
    }

    #[test]
    fn test_filtering_is_order_insensitive() {
        let a = stable_params(Some("a=1&b=2&ts=9"), &volatile());
        let b = stable_params(Some("ts=1&b=2&a=1"), &volatile());
        assert_eq!(a, b);
    }

    #[test]
    fn test_value_matching_volatile_is_kept() {
        let set = stable_params(Some("mode=lat"), &volatile());
        assert!(set.contains("mode=lat"));
    }

    #[test]
    fn test_empty_query() {
        assert!(stable_params(None, &volatile()).is_empty());
        assert!(stable_params(Some(""), &volatile()).is_empty());
    }
}
