//! Known video/audio/document hosts and their embed URLs.
//!
//! Each provider is matched by a dedicated regex that extracts the
//! provider-specific identifier from a page URL.  Used by the Markdown media
//! embedder and by the `video_embed` response filter.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    YouTube,
    Spotify,
    Bitchute,
    Odysee,
    Vimeo,
    DocDroid,
}

/// A recognised embed: which host, and the URL to place in an iframe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Embed {
    pub provider: Provider,
    pub embed_url: String,
}

static YOUTUBE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:youtube\.com/(?:watch\?(?:[^#\s]*&)?v=|embed/|shorts/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .unwrap()
});
static SPOTIFY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)open\.spotify\.com/(?:embed/)?(track|album|playlist|episode|show|artist)/([A-Za-z0-9]+)")
        .unwrap()
});
static BITCHUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bitchute\.com/(?:video|embed)/([A-Za-z0-9_-]+)").unwrap());
static ODYSEE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)odysee\.com/(?:\$/embed/)?(@[^/\s?#]+/[^/\s?#]+)").unwrap()
});
static VIMEO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)vimeo\.com/(?:video/)?(\d+)").unwrap());
static DOCDROID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)docdroid\.net/(?:embed/)?([A-Za-z0-9]+)").unwrap()
});

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::YouTube => "youtube",
            Provider::Spotify => "spotify",
            Provider::Bitchute => "bitchute",
            Provider::Odysee => "odysee",
            Provider::Vimeo => "vimeo",
            Provider::DocDroid => "docdroid",
        }
    }
}

/// Match `url` against every provider in a fixed order and return the first
/// embed found.
pub fn detect(url: &str) -> Option<Embed> {
    if let Some(c) = YOUTUBE_RE.captures(url) {
        return Some(Embed {
            provider: Provider::YouTube,
            embed_url: format!("https://www.youtube.com/embed/{}", &c[1]),
        });
    }
    if let Some(c) = SPOTIFY_RE.captures(url) {
        return Some(Embed {
            provider: Provider::Spotify,
            embed_url: format!(
                "https://open.spotify.com/embed/{}/{}",
                c[1].to_ascii_lowercase(),
                &c[2]
            ),
        });
    }
    if let Some(c) = BITCHUTE_RE.captures(url) {
        return Some(Embed {
            provider: Provider::Bitchute,
            embed_url: format!("https://www.bitchute.com/embed/{}/", &c[1]),
        });
    }
    if let Some(c) = ODYSEE_RE.captures(url) {
        return Some(Embed {
            provider: Provider::Odysee,
            embed_url: format!("https://odysee.com/$/embed/{}", &c[1]),
        });
    }
    if let Some(c) = VIMEO_RE.captures(url) {
        return Some(Embed {
            provider: Provider::Vimeo,
            embed_url: format!("https://player.vimeo.com/video/{}", &c[1]),
        });
    }
    if let Some(c) = DOCDROID_RE.captures(url) {
        return Some(Embed {
            provider: Provider::DocDroid,
            embed_url: format!("https://www.docdroid.net/embed/{}", &c[1]),
        });
    }
    None
}
