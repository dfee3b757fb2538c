//! # CDN Cache Status
//!
//! Recognizes which edge network fronted a request from the headers it left
//! behind, and folds that vendor's cache-status vocabulary into [`CacheStatus`].
//!
//! Detection walks a fixed vendor table in order and the first vendor whose
//! marker headers are present wins. A bare `x-cache` with no vendor markers is
//! reported as [`CdnProvider::Generic`]. Nothing here can fail: unknown tokens
//! normalize to [`CacheStatus::Unknown`].

use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Every header name the detector inspects
pub const INSPECTED_HEADERS: &[&str] = &[
    "cf-cache-status",
    "x-served-by",
    "x-cache",
    "x-cache-hits",
    "x-amz-cf-pop",
    "x-amz-cf-id",
    "x-akamai-cache-status",
    "x-cache-key",
    "akamai-cache-status",
    "x-vercel-cache",
    "x-vercel-id",
    "x-nf-request-id",
    "cache-status",
];

/// Edge network vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CdnProvider {
    Cloudflare,
    Fastly,
    CloudFront,
    Akamai,
    Vercel,
    Netlify,
    Generic,
}

impl CdnProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdnProvider::Cloudflare => "CLOUDFLARE",
            CdnProvider::Fastly => "FASTLY",
            CdnProvider::CloudFront => "CLOUDFRONT",
            CdnProvider::Akamai => "AKAMAI",
            CdnProvider::Vercel => "VERCEL",
            CdnProvider::Netlify => "NETLIFY",
            CdnProvider::Generic => "GENERIC",
        }
    }
}

impl fmt::Display for CdnProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor-neutral cache status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
    Expired,
    Unknown,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
            CacheStatus::Expired => "EXPIRED",
            CacheStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the edge reported for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CdnInfo {
    pub provider: Option<CdnProvider>,
    /// The token the status was derived from, after hop selection
    pub raw_cache_status: Option<String>,
    pub normalized_status: CacheStatus,
    /// Inspected headers that were present, lowercased names
    pub raw_headers: BTreeMap<String, String>,
}

impl CdnInfo {
    fn none(raw_headers: BTreeMap<String, String>) -> Self {
        Self {
            provider: None,
            raw_cache_status: None,
            normalized_status: CacheStatus::Unknown,
            raw_headers,
        }
    }

    /// `PROVIDER:STATUS(raw)`, or `NONE` when no edge was detected
    pub fn diagnostic(&self) -> String {
        match self.provider {
            None => "NONE".to_string(),
            Some(provider) => format!(
                "{}:{}({})",
                provider,
                self.normalized_status,
                self.raw_cache_status.as_deref().unwrap_or("")
            ),
        }
    }

    pub fn is_detected(&self) -> bool {
        self.provider.is_some()
    }
}

/// Inspect request headers for an edge cache status
pub fn detect(headers: &HeaderMap) -> CdnInfo {
    let raw_headers: BTreeMap<String, String> = INSPECTED_HEADERS
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(|value| (name.to_string(), value.trim().to_string()))
        })
        .collect();

    let header = |name: &str| raw_headers.get(name).map(String::as_str);

    let detected = if let Some(raw) = header("cf-cache-status") {
        Some((CdnProvider::Cloudflare, raw.to_string(), normalize_cloudflare(raw)))
    } else if let (Some(_), Some(chain)) = (header("x-served-by"), header("x-cache")) {
        let hop = last_hop(chain);
        Some((CdnProvider::Fastly, hop.to_string(), normalize_fastly(hop)))
    } else if let (true, Some(raw)) = (
        header("x-amz-cf-pop").is_some() || header("x-amz-cf-id").is_some(),
        header("x-cache"),
    ) {
        Some((CdnProvider::CloudFront, raw.to_string(), normalize_cloudfront(raw)))
    } else if let Some(raw) = header("x-akamai-cache-status").or(header("akamai-cache-status")) {
        Some((CdnProvider::Akamai, raw.to_string(), normalize_akamai(raw)))
    } else if let Some(raw) = header("x-cache").filter(|raw| {
        header("x-cache-key").is_some() || raw.to_ascii_uppercase().starts_with("TCP_")
    }) {
        Some((CdnProvider::Akamai, raw.to_string(), normalize_akamai(raw)))
    } else if let Some(raw) = header("x-vercel-cache") {
        Some((CdnProvider::Vercel, raw.to_string(), normalize_vercel(raw)))
    } else if let (Some(_), Some(raw)) = (header("x-nf-request-id"), header("cache-status")) {
        let entry = last_hop(raw);
        Some((CdnProvider::Netlify, entry.to_string(), normalize_netlify(entry)))
    } else if let Some(raw) = header("x-cache") {
        let hop = last_hop(raw);
        Some((CdnProvider::Generic, hop.to_string(), normalize_generic(hop)))
    } else {
        None
    };

    match detected {
        None => CdnInfo::none(raw_headers),
        Some((provider, raw, normalized_status)) => CdnInfo {
            provider: Some(provider),
            raw_cache_status: Some(raw),
            normalized_status,
            raw_headers,
        },
    }
}

/// Multi-hop headers list the hop nearest the client last
fn last_hop(chain: &str) -> &str {
    chain.rsplit(',').next().unwrap_or(chain).trim()
}

fn normalize_cloudflare(raw: &str) -> CacheStatus {
    match raw.to_ascii_uppercase().as_str() {
        "HIT" | "STALE" | "UPDATING" | "REVALIDATED" => CacheStatus::Hit,
        "MISS" | "NONE" => CacheStatus::Miss,
        "EXPIRED" => CacheStatus::Expired,
        "BYPASS" | "DYNAMIC" => CacheStatus::Bypass,
        _ => CacheStatus::Unknown,
    }
}

fn normalize_fastly(hop: &str) -> CacheStatus {
    let hop = hop.to_ascii_uppercase();
    if hop.contains("HIT") {
        CacheStatus::Hit
    } else if hop.contains("MISS") {
        CacheStatus::Miss
    } else if hop.contains("PASS") {
        CacheStatus::Bypass
    } else {
        CacheStatus::Unknown
    }
}

fn normalize_cloudfront(raw: &str) -> CacheStatus {
    let raw = raw.to_ascii_lowercase();
    if raw.contains("refreshhit") || raw.starts_with("hit") {
        CacheStatus::Hit
    } else if raw.starts_with("miss") {
        CacheStatus::Miss
    } else if raw.starts_with("limitexceeded") || raw.starts_with("error") {
        CacheStatus::Bypass
    } else {
        CacheStatus::Unknown
    }
}

fn normalize_akamai(raw: &str) -> CacheStatus {
    let raw = raw.to_ascii_uppercase();
    if raw.contains("REFRESH_MISS") || raw.contains("EXPIRED") {
        CacheStatus::Expired
    } else if raw.contains("HIT") {
        CacheStatus::Hit
    } else if raw.contains("MISS") {
        CacheStatus::Miss
    } else if raw.contains("DENIED") || raw.contains("NONE") {
        CacheStatus::Bypass
    } else {
        CacheStatus::Unknown
    }
}

fn normalize_vercel(raw: &str) -> CacheStatus {
    match raw.to_ascii_uppercase().as_str() {
        "HIT" | "PRERENDER" => CacheStatus::Hit,
        "MISS" | "REVALIDATED" => CacheStatus::Miss,
        "STALE" => CacheStatus::Expired,
        "BYPASS" => CacheStatus::Bypass,
        _ => CacheStatus::Unknown,
    }
}

/// Structured `Cache-Status` entry, e.g. `"Netlify Edge"; fwd=miss`
fn normalize_netlify(entry: &str) -> CacheStatus {
    let entry = entry.to_ascii_lowercase();
    let params: Vec<&str> = entry.split(';').skip(1).map(str::trim).collect();

    if params.iter().any(|p| *p == "hit") {
        CacheStatus::Hit
    } else if params.iter().any(|p| *p == "fwd=stale") {
        CacheStatus::Expired
    } else if params.iter().any(|p| p.starts_with("fwd=") && p.ends_with("miss")) {
        CacheStatus::Miss
    } else if params.iter().any(|p| *p == "fwd=bypass" || *p == "fwd=request") {
        CacheStatus::Bypass
    } else {
        CacheStatus::Unknown
    }
}

fn normalize_generic(hop: &str) -> CacheStatus {
    let hop = hop.to_ascii_uppercase();
    if hop.contains("HIT") {
        CacheStatus::Hit
    } else if hop.contains("MISS") {
        CacheStatus::Miss
    } else if hop.contains("EXPIRED") || hop.contains("STALE") {
        CacheStatus::Expired
    } else if hop.contains("BYPASS") || hop.contains("PASS") {
        CacheStatus::Bypass
    } else {
        CacheStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_no_headers() {
        let info = detect(&HeaderMap::new());
        assert_eq!(info.provider, None);
        assert_eq!(info.normalized_status, CacheStatus::Unknown);
        assert_eq!(info.diagnostic(), "NONE");
        assert!(info.raw_headers.is_empty());
    }

    #[test]
    fn test_cloudflare() {
        let info = detect(&headers(&[("cf-cache-status", "HIT")]));
        assert_eq!(info.provider, Some(CdnProvider::Cloudflare));
        assert_eq!(info.normalized_status, CacheStatus::Hit);
        assert_eq!(info.diagnostic(), "CLOUDFLARE:HIT(HIT)");

        let info = detect(&headers(&[("cf-cache-status", "DYNAMIC")]));
        assert_eq!(info.normalized_status, CacheStatus::Bypass);
    }

    #[test]
    fn test_fastly_last_hop_wins() {
        let info = detect(&headers(&[
            ("x-served-by", "cache-iad-kiad7000025-IAD, cache-lhr7340-LHR"),
            ("x-cache", "MISS, HIT"),
        ]));
        assert_eq!(info.provider, Some(CdnProvider::Fastly));
        assert_eq!(info.raw_cache_status.as_deref(), Some("HIT"));
        assert_eq!(info.normalized_status, CacheStatus::Hit);

        let info = detect(&headers(&[("x-served-by", "cache-a"), ("x-cache", "HIT, MISS")]));
        assert_eq!(info.normalized_status, CacheStatus::Miss);
    }

    #[test]
    fn test_cloudfront() {
        let info = detect(&headers(&[
            ("x-amz-cf-pop", "FRA56-C1"),
            ("x-cache", "Hit from cloudfront"),
        ]));
        assert_eq!(info.provider, Some(CdnProvider::CloudFront));
        assert_eq!(info.normalized_status, CacheStatus::Hit);
        assert_eq!(info.diagnostic(), "CLOUDFRONT:HIT(Hit from cloudfront)");

        let info = detect(&headers(&[
            ("x-amz-cf-id", "abc"),
            ("x-cache", "Miss from cloudfront"),
        ]));
        assert_eq!(info.normalized_status, CacheStatus::Miss);
    }

    #[test]
    fn test_akamai() {
        let info = detect(&headers(&[("x-akamai-cache-status", "TCP_MEM_HIT")]));
        assert_eq!(info.provider, Some(CdnProvider::Akamai));
        assert_eq!(info.normalized_status, CacheStatus::Hit);

        let info = detect(&headers(&[("x-cache", "TCP_REFRESH_MISS from a23-1-2-3")]));
        assert_eq!(info.provider, Some(CdnProvider::Akamai));
        assert_eq!(info.normalized_status, CacheStatus::Expired);
    }

    #[test]
    fn test_vercel_and_netlify() {
        let info = detect(&headers(&[("x-vercel-cache", "STALE")]));
        assert_eq!(info.provider, Some(CdnProvider::Vercel));
        assert_eq!(info.normalized_status, CacheStatus::Expired);

        let info = detect(&headers(&[
            ("x-nf-request-id", "01H"),
            ("cache-status", "\"Netlify Edge\"; fwd=miss"),
        ]));
        assert_eq!(info.provider, Some(CdnProvider::Netlify));
        assert_eq!(info.normalized_status, CacheStatus::Miss);

        let info = detect(&headers(&[
            ("x-nf-request-id", "01H"),
            ("cache-status", "\"Netlify Durable\"; fwd=miss, \"Netlify Edge\"; hit"),
        ]));
        assert_eq!(info.normalized_status, CacheStatus::Hit);
    }

    #[test]
    fn test_generic_x_cache() {
        let info = detect(&headers(&[("x-cache", "HIT")]));
        assert_eq!(info.provider, Some(CdnProvider::Generic));
        assert_eq!(info.normalized_status, CacheStatus::Hit);
        assert_eq!(info.raw_headers.get("x-cache").map(String::as_str), Some("HIT"));
    }

    #[test]
    fn test_unrecognized_token_is_unknown() {
        let info = detect(&headers(&[("cf-cache-status", "SOMETHING-NEW")]));
        assert_eq!(info.provider, Some(CdnProvider::Cloudflare));
        assert_eq!(info.normalized_status, CacheStatus::Unknown);
    }
}
