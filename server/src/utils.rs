use std::net::IpAddr;

use axum::http::HeaderMap;
use regex::Regex;

pub const MAX_SLUG_LEN: usize = 64;

/// Slugs double as URL path segments and Redis hash fields, so keep them boring.
pub const RESERVED_SLUGS: &[&str] = &["admin", "api", "health", "uploads", "p", "r"];

pub fn sanitize_slug(input: &str) -> String {
    let replace = Regex::new(r"[_ ]").unwrap();
    let mut s = replace.replace_all(input, "-").into_owned();

    let clean_re = Regex::new(r"[^A-Za-z0-9-]").unwrap();
    s = clean_re.replace_all(&s, "").into_owned();

    let collapse = Regex::new(r"-+").unwrap();
    s = collapse.replace_all(&s, "-").into_owned();

    s.trim_matches('-').to_lowercase()
}

pub fn valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.len() <= MAX_SLUG_LEN && !RESERVED_SLUGS.contains(&slug)
}

/// Best-effort client address: leftmost `X-Forwarded-For` entry when present
/// (we sit behind the reverse proxy), otherwise the peer address.
pub fn client_ip(headers: &HeaderMap, peer: &IpAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.to_string())
}
