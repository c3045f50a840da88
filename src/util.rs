//! Utility helpers for linkhub.
//!
//! Request-key normalisation used by the response filter registry, stable
//! content hashing for the double-submission guard, URL scheme checks and
//! HTML escaping shared by the Markdown serializer and the response filters.

use ahash::AHasher;
use std::hash::{Hash, Hasher};

/// Build the signature key a response filter prefix is matched against:
/// `"<lowercase method>_<path with slashes as underscores>_"`.  Leading and
/// trailing slashes are dropped so `/links/5` becomes `get_links_5_`.
pub fn request_key(method: &str, path: &str) -> String {
    let path = path.trim_matches('/').replace('/', "_");
    format!("{}_{}_", method.to_ascii_lowercase(), path.to_ascii_lowercase())
}

/// Hash a call-site discriminator together with a serialized payload.  The
/// hasher uses fixed keys, so equal inputs give equal keys for the lifetime
/// of the process, which is all an in-process cache needs.
pub fn content_key(callsite: &str, serialized: &str) -> String {
    let mut hasher = AHasher::default();
    callsite.hash(&mut hasher);
    serialized.hash(&mut hasher);
    format!("{}:{:016x}", callsite, hasher.finish())
}

const SAFE_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Scheme of `url` the way a browser reads it: ASCII whitespace and control
/// characters are skipped and the result is lowercased.  Relative references
/// have none.
pub fn url_scheme(url: &str) -> Option<String> {
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .collect();
    let end = cleaned.find([':', '/', '?', '#'])?;
    if cleaned[end..].starts_with(':') {
        Some(cleaned[..end].to_ascii_lowercase())
    } else {
        None
    }
}

/// Whether `url` may be emitted as a link target: relative references and
/// http, https or mailto URLs.
pub fn is_safe_href(url: &str) -> bool {
    match url_scheme(url) {
        None => true,
        Some(scheme) => SAFE_SCHEMES.contains(&scheme.as_str()),
    }
}

pub fn is_http_url(url: &str) -> bool {
    matches!(url_scheme(url).as_deref(), Some("http" | "https"))
}

/// Escape text for inclusion in HTML element content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse the handful of entities `escape_html` produces, plus `&nbsp;`.
pub fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
