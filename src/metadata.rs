//! Page metadata and mimetype lookups used by the media embedder.
//!
//! Lookups sit inline in the per-element rendering path, so the HTTP
//! implementation runs with a short client timeout and reports every
//! failure as an [`UpstreamError`] that callers treat as "no match".

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::util::unescape_html;

/// Largest page prefix read and inspected for meta tags.  The rest of the
/// body is never downloaded.
pub const MAX_PAGE_BYTES: usize = 512 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub keywords: Vec<String>,
    pub canonical_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("metadata lookups are disabled")]
    Disabled,
}

#[async_trait::async_trait]
pub trait MetadataSource: Send + Sync {
    async fn metadata(&self, url: &str) -> Result<PageMetadata, UpstreamError>;
    /// Content type of `url` without parameters, lower-cased.
    async fn mimetype(&self, url: &str) -> Result<Option<String>, UpstreamError>;
}

/// Fetches pages over HTTP and extracts open-graph style metadata.
pub struct HttpMetadataSource {
    client: reqwest::Client,
}

impl HttpMetadataSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("linkhub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn metadata(&self, url: &str) -> Result<PageMetadata, UpstreamError> {
        let mut resp = self
            .client
            .get(url)
            .header("accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type);
        if !content_type.as_deref().map_or(true, is_markup) {
            tracing::debug!(url, content_type = ?content_type, "not a page; skipping body");
            return Ok(PageMetadata::default());
        }
        let final_url = resp.url().clone();

        let mut body: Vec<u8> = Vec::new();
        while body.len() < MAX_PAGE_BYTES {
            let chunk = resp.chunk().await.map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })?;
            match chunk {
                Some(bytes) => body.extend_from_slice(&bytes),
                None => break,
            }
        }
        body.truncate(MAX_PAGE_BYTES);
        let mut meta = parse_metadata(&String::from_utf8_lossy(&body));
        // og:image is frequently site-relative
        if let Some(image) = meta.image.take() {
            meta.image = final_url.join(&image).ok().map(|u| u.to_string());
        }
        tracing::debug!(url, has_image = meta.image.is_some(), "fetched page metadata");
        Ok(meta)
    }

    async fn mimetype(&self, url: &str) -> Result<Option<String>, UpstreamError> {
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type))
    }
}

/// Used when outbound lookups are switched off: every lookup fails, which
/// the media embedder treats as "no match".
pub struct OfflineMetadataSource;

#[async_trait::async_trait]
impl MetadataSource for OfflineMetadataSource {
    async fn metadata(&self, _url: &str) -> Result<PageMetadata, UpstreamError> {
        Err(UpstreamError::Disabled)
    }

    async fn mimetype(&self, _url: &str) -> Result<Option<String>, UpstreamError> {
        Err(UpstreamError::Disabled)
    }
}

/// `Text/HTML; charset=utf-8` -> `text/html`
fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_markup(media_type: &str) -> bool {
    matches!(media_type, "text/html" | "application/xhtml+xml")
}

static META_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\s[^>]*>").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<link\s[^>]*>").unwrap());
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

fn attributes(tag: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(tag)
        .filter_map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).or_else(|| c.get(4))?;
            Some((
                c[1].to_ascii_lowercase(),
                unescape_html(value.as_str().trim()),
            ))
        })
        .collect()
}

/// Extract title, description, image, keywords and canonical URL from an
/// HTML document.  Open-graph properties win over their plain counterparts.
pub fn parse_metadata(html: &str) -> PageMetadata {
    let mut props: HashMap<String, String> = HashMap::new();
    for m in META_RE.find_iter(html) {
        let attrs = attributes(m.as_str());
        let key = attrs.get("property").or_else(|| attrs.get("name"));
        if let (Some(key), Some(content)) = (key, attrs.get("content")) {
            if !content.is_empty() {
                props
                    .entry(key.to_ascii_lowercase())
                    .or_insert_with(|| content.clone());
            }
        }
    }

    let canonical_url = LINK_RE
        .find_iter(html)
        .map(|m| attributes(m.as_str()))
        .find(|attrs| {
            attrs
                .get("rel")
                .map(|r| r.eq_ignore_ascii_case("canonical"))
                .unwrap_or(false)
        })
        .and_then(|attrs| attrs.get("href").cloned())
        .or_else(|| props.get("og:url").cloned());

    let title = props
        .get("og:title")
        .cloned()
        .or_else(|| {
            TITLE_RE
                .captures(html)
                .map(|c| unescape_html(c[1].trim()))
                .filter(|t| !t.is_empty())
        });

    let keywords = props
        .get("keywords")
        .map(|k| {
            k.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    PageMetadata {
        title,
        description: props
            .get("og:description")
            .or_else(|| props.get("description"))
            .cloned(),
        image: props
            .get("og:image")
            .or_else(|| props.get("og:image:url"))
            .or_else(|| props.get("twitter:image"))
            .cloned(),
        keywords,
        canonical_url,
    }
}
