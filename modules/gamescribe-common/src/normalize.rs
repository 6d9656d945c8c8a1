//! Query and URL normalization shared by the research pool and the source cache.

use url::Url;

/// Lowercase, trim, and collapse internal whitespace. Idempotent.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse as an absolute http(s) URL and drop the fragment. The query string
/// is kept because it frequently identifies the page (`?p=123`, `?id=`).
/// Returns `None` for anything unparsable or with another scheme.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw.trim()).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str()?;
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Lowercased host with a leading `www.` removed. Empty for unparsable input.
pub fn extract_domain(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let host = parsed.host_str().unwrap_or("").to_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}
