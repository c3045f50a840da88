use std::collections::BTreeMap;
use std::env;
use std::fs;

use anyhow::{anyhow, Context, Result};

use crate::filters::parse_filter_names;
use crate::markdown::media_embedder::DEFAULT_PDF_VIEWER;
use crate::store::Channel;
use crate::twofactor::DEFAULT_TTL_SECS;

/// Upper bound for `LINKHUB_GUARD_TTL_SECS`: one day.
pub const MAX_GUARD_TTL_SECS: u64 = 24 * 60 * 60;

/// Settings loaded from the optional `LINKHUB_CONFIG` JSON file.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// Base URL prepended to outbound links in rendered Markdown.
    #[serde(default)]
    pub redirect_base: Option<String>,
    /// Viewer that PDF images are embedded through; the document URL is
    /// appended as the `url` query parameter.
    #[serde(default = "default_pdf_viewer")]
    pub pdf_viewer_url: String,
    /// Channels known at startup.
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Session table: bearer token → channel name.
    #[serde(default)]
    pub sessions: BTreeMap<String, String>,
}

fn default_pdf_viewer() -> String {
    DEFAULT_PDF_VIEWER.to_owned()
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            redirect_base: None,
            pdf_viewer_url: default_pdf_viewer(),
            channels: Vec::new(),
            sessions: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redirect_base: Option<String>,
    pub pdf_viewer_url: String,
    pub channels: Vec<Channel>,
    pub sessions: BTreeMap<String, String>,
    pub response_filters: Vec<String>,
    pub media_fetch: bool,
    pub media_timeout_ms: u64,
    pub token_ttl_secs: u64,
    pub guard_ttl_secs: u64,
    pub max_request_bytes: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let file = FileConfig::default();
        Self {
            redirect_base: file.redirect_base,
            pdf_viewer_url: file.pdf_viewer_url,
            channels: file.channels,
            sessions: file.sessions,
            response_filters: parse_filter_names(None),
            media_fetch: true,
            media_timeout_ms: 1500,
            token_ttl_secs: DEFAULT_TTL_SECS,
            guard_ttl_secs: 10,
            max_request_bytes: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let file = if let Ok(path) = env::var("LINKHUB_CONFIG") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!("Failed to read LINKHUB_CONFIG '{}': file unreadable", path)
            })?;
            serde_json::from_str::<FileConfig>(&content).with_context(|| {
                format!(
                    "Failed to parse LINKHUB_CONFIG '{}': invalid JSON configuration",
                    path
                )
            })?
        } else {
            FileConfig::default()
        };

        let redirect_base = env::var("LINKHUB_REDIRECT_BASE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or(file.redirect_base);

        let mut sessions = file.sessions;
        if let Ok(raw) = env::var("LINKHUB_SESSIONS") {
            sessions.extend(parse_sessions(&raw)?);
        }

        let response_filters =
            parse_filter_names(env::var("LINKHUB_RESPONSE_FILTERS").ok().as_deref());

        let guard_ttl_secs = parse_optional_u64("LINKHUB_GUARD_TTL_SECS")?.unwrap_or(10);
        if guard_ttl_secs > MAX_GUARD_TTL_SECS {
            return Err(anyhow!(
                "LINKHUB_GUARD_TTL_SECS must be at most {} (got {})",
                MAX_GUARD_TTL_SECS,
                guard_ttl_secs
            ));
        }

        Ok(Self {
            redirect_base,
            pdf_viewer_url: file.pdf_viewer_url,
            channels: file.channels,
            sessions,
            response_filters,
            media_fetch: parse_bool_env("LINKHUB_MEDIA_FETCH")?.unwrap_or(true),
            media_timeout_ms: parse_optional_u64("LINKHUB_MEDIA_TIMEOUT_MS")?.unwrap_or(1500),
            token_ttl_secs: parse_optional_u64("LINKHUB_TOKEN_TTL_SECS")?
                .unwrap_or(DEFAULT_TTL_SECS),
            guard_ttl_secs,
            max_request_bytes: parse_optional_u64("LINKHUB_MAX_REQUEST_BYTES")?
                .map(|v| v as usize),
        })
    }
}

/// `token:channel,token:channel`
fn parse_sessions(raw: &str) -> Result<BTreeMap<String, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once(':') {
            Some((token, channel)) if !token.trim().is_empty() && !channel.trim().is_empty() => {
                Ok((token.trim().to_string(), channel.trim().to_string()))
            }
            _ => Err(anyhow!(
                "LINKHUB_SESSIONS entries must look like token:channel (got '{}')",
                pair
            )),
        })
        .collect()
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
