//! # Cache Key Generator
//!
//! Reduces an unordered query-parameter collection to one deterministic
//! string so logically identical catalog queries share a cache line.
//!
//! Pairs are sorted by key (then by value, so repeated keys stay stable) and
//! re-encoded as `application/x-www-form-urlencoded`, so a decoded `&` or `=`
//! inside a value can never read as a separator. An empty parameter set maps
//! to [`EMPTY_QUERY_KEY`].

/// Key shared by every request without filters
pub const EMPTY_QUERY_KEY: &str = "__all__";

/// Build the canonical key for a set of parameters
pub fn canonicalize<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();

    if pairs.is_empty() {
        return EMPTY_QUERY_KEY.to_string();
    }

    pairs.sort();

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

/// Canonicalize a raw, percent-encoded query string (`b=2&a=1`)
pub fn canonicalize_query(raw: Option<&str>) -> String {
    match raw {
        None => EMPTY_QUERY_KEY.to_string(),
        Some(raw) => canonicalize(
            url::form_urlencoded::parse(raw.as_bytes()).filter(|(k, _)| !k.is_empty()),
        ),
    }
}

/// Prefix a canonical key with the route it belongs to
pub fn scoped_key(route: &str, canonical: &str) -> String {
    format!("{}?{}", route, canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parameter_order_does_not_matter() {
        let a = canonicalize([("b", "2"), ("a", "1")]);
        let b = canonicalize([("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
        assert_eq!(a, "a=1&b=2");
    }

    #[test]
    fn test_empty_parameters_map_to_sentinel() {
        let empty: Vec<(String, String)> = Vec::new();
        assert_eq!(canonicalize(empty), EMPTY_QUERY_KEY);
        assert_eq!(canonicalize_query(None), EMPTY_QUERY_KEY);
        assert_eq!(canonicalize_query(Some("")), EMPTY_QUERY_KEY);
    }

    #[test]
    fn test_hashmap_input_is_deterministic() {
        let mut params = HashMap::new();
        params.insert("readyToShip".to_string(), "true".to_string());
        params.insert("category".to_string(), "ring".to_string());
        params.insert("metal".to_string(), "gold".to_string());

        assert_eq!(
            canonicalize(&params),
            "category=ring&metal=gold&readyToShip=true"
        );
    }

    #[test]
    fn test_repeated_keys_are_ordered_by_value() {
        let a = canonicalize([("metal", "silver"), ("metal", "gold")]);
        let b = canonicalize([("metal", "gold"), ("metal", "silver")]);
        assert_eq!(a, b);
        assert_eq!(a, "metal=gold&metal=silver");
    }

    #[test]
    fn test_raw_query_is_decoded_before_sorting() {
        assert_eq!(
            canonicalize_query(Some("sort=price_desc&category=ring%20set")),
            "category=ring+set&sort=price_desc"
        );
        assert_eq!(
            canonicalize_query(Some("b=2&a=1")),
            canonicalize_query(Some("a=1&b=2"))
        );
    }

    #[test]
    fn test_encoded_separators_stay_inside_their_value() {
        let smuggled = canonicalize_query(Some("category=ring%26readyToShip%3Dtrue"));
        let plain = canonicalize_query(Some("category=ring&readyToShip=true"));

        assert_ne!(smuggled, plain);
        assert_eq!(smuggled, "category=ring%26readyToShip%3Dtrue");
        assert_eq!(plain, "category=ring&readyToShip=true");

        assert_ne!(
            canonicalize([("a", "1&b=2")]),
            canonicalize([("a", "1"), ("b", "2")])
        );
        assert_eq!(canonicalize([("q", "100%")]), "q=100%25");
    }

    #[test]
    fn test_scoped_key() {
        assert_eq!(scoped_key("/api/products", EMPTY_QUERY_KEY), "/api/products?__all__");
    }
}
