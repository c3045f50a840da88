use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::ResponseFilter;
use crate::error::AppError;
use crate::providers;
use crate::util::{escape_html, unescape_html};

static ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a\s[^>]*?href="([^"]*)"[^>]*>.*?</a>"#).unwrap());

/// Appends a provider iframe after every anchor in a link's rendered `html`
/// that points at a known video/audio host.  Each embed appears at most once:
/// embeds already in the document, or added for an earlier anchor, are not
/// repeated.
pub struct VideoEmbedFilter;

pub fn embed_videos(html: &str) -> String {
    let mut embedded: HashSet<String> = HashSet::new();
    ANCHOR_RE
        .replace_all(html, |caps: &Captures<'_>| {
            let anchor = &caps[0];
            let href = unescape_html(&caps[1]);
            let embed = match providers::detect(&href) {
                Some(embed) => embed,
                None => return anchor.to_string(),
            };
            let src = escape_html(&embed.embed_url);
            if html.contains(&src) || !embedded.insert(src.clone()) {
                return anchor.to_string();
            }
            format!(
                r#"{}<iframe allowfullscreen="" class="embed embed-{}" loading="lazy" src="{}"></iframe>"#,
                anchor,
                embed.provider.name(),
                src
            )
        })
        .into_owned()
}

fn embed_in_link(link: &mut Value) {
    if let Some(Value::String(html)) = link.get_mut("html") {
        let embedded = embed_videos(html);
        *html = embedded;
    }
}

#[async_trait::async_trait]
impl ResponseFilter for VideoEmbedFilter {
    fn name(&self) -> &str {
        "video_embed"
    }

    async fn apply(
        &self,
        _path: &str,
        _args: &Map<String, Value>,
        data: &mut Value,
    ) -> Result<(), AppError> {
        if let Some(Value::Array(links)) = data.get_mut("links") {
            links.iter_mut().for_each(embed_in_link);
        } else {
            embed_in_link(data);
        }
        Ok(())
    }
}
