use std::sync::Arc;

use super::{ElementFilter, ElementNode, RenderContext};
use crate::metadata::MetadataSource;
use crate::providers::{self, Embed};
use crate::util::{is_http_url, is_safe_href};

pub const DEFAULT_PDF_VIEWER: &str = "https://docs.google.com/viewer?embedded=true";

/// Replaces `<img>` nodes with provider embeds, open-graph images or PDF
/// viewers.  Anything else is downgraded to a plain link so the platform
/// never hot-links third-party images.  Only http(s) sources are looked up;
/// a source with any other unsafe scheme keeps just its text.
pub struct MediaEmbedder {
    source: Arc<dyn MetadataSource>,
    pdf_viewer_url: String,
}

impl MediaEmbedder {
    pub fn new(source: Arc<dyn MetadataSource>, pdf_viewer_url: impl Into<String>) -> Self {
        Self {
            source,
            pdf_viewer_url: pdf_viewer_url.into(),
        }
    }

    fn iframe(src: String, class: &str) -> ElementNode {
        ElementNode::new("iframe")
            .with_attr("src", src)
            .with_attr("class", class.to_string())
            .with_attr("loading", "lazy")
            .with_attr("allowfullscreen", "")
    }

    fn provider_iframe(embed: Embed) -> ElementNode {
        Self::iframe(
            embed.embed_url,
            &format!("embed embed-{}", embed.provider.name()),
        )
    }

    fn pdf_iframe(&self, src: &str) -> Option<ElementNode> {
        let url = reqwest::Url::parse_with_params(&self.pdf_viewer_url, &[("url", src)]).ok()?;
        Some(Self::iframe(url.to_string(), "embed embed-pdf"))
    }

    fn safe_link(src: &str, node: &ElementNode) -> ElementNode {
        let text = [node.attr("alt"), node.attr("title"), Some(node.text.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|t| !t.is_empty())
            .unwrap_or(src)
            .to_string();
        if is_safe_href(src) {
            ElementNode::new("a").with_attr("href", src).with_text(text)
        } else {
            ElementNode::new("span").with_text(text)
        }
    }
}

#[async_trait::async_trait]
impl ElementFilter for MediaEmbedder {
    fn name(&self) -> &str {
        "media_embedder"
    }

    async fn filter(&self, node: ElementNode, _ctx: &mut RenderContext) -> ElementNode {
        if !node.is("img") {
            return node;
        }
        let src = match node.attr("src") {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return node,
        };
        if !is_http_url(&src) {
            return Self::safe_link(&src, &node);
        }

        if let Some(embed) = providers::detect(&src) {
            return Self::provider_iframe(embed);
        }

        let meta = match self.source.metadata(&src).await {
            Ok(meta) => Some(meta),
            Err(err) => {
                tracing::debug!(url = %src, error = %err, "metadata lookup failed; treating as no match");
                None
            }
        };
        if let Some(meta) = &meta {
            if let Some(embed) = meta.canonical_url.as_deref().and_then(providers::detect) {
                return Self::provider_iframe(embed);
            }
            if let Some(image) = meta.image.as_deref().filter(|i| is_http_url(i)) {
                return ElementNode::new("img")
                    .with_attr("src", image)
                    .with_attr("alt", node.text.clone())
                    .with_text(node.text.clone());
            }
        }

        match self.source.mimetype(&src).await {
            Ok(Some(mime)) if mime == "application/pdf" => {
                if let Some(iframe) = self.pdf_iframe(&src) {
                    return iframe;
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(url = %src, error = %err, "mimetype lookup failed; treating as no match");
            }
        }

        Self::safe_link(&src, &node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{PageMetadata, UpstreamError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubSource {
        meta: Option<PageMetadata>,
        mime: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetadataSource for StubSource {
        async fn metadata(&self, _url: &str) -> Result<PageMetadata, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.meta.clone().ok_or(UpstreamError::Disabled)
        }

        async fn mimetype(&self, _url: &str) -> Result<Option<String>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.mime {
                Some(m) => Ok(Some(m.clone())),
                None => Err(UpstreamError::Disabled),
            }
        }
    }

    fn img(src: &str, alt: &str) -> ElementNode {
        ElementNode::new("img")
            .with_attr("src", src)
            .with_attr("alt", alt)
            .with_text(alt)
    }

    async fn embed(source: StubSource, node: ElementNode) -> (ElementNode, usize) {
        let source = Arc::new(source);
        let embedder = MediaEmbedder::new(source.clone(), DEFAULT_PDF_VIEWER);
        let out = embedder.filter(node, &mut RenderContext::default()).await;
        (out, source.calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn youtube_image_becomes_iframe_without_lookup() {
        let (out, calls) = embed(
            StubSource::default(),
            img("https://www.youtube.com/watch?v=UHkjxowYUdg", "clip"),
        )
        .await;
        assert_eq!(out.tag_name, "iframe");
        assert_eq!(out.attr("src"), Some("https://www.youtube.com/embed/UHkjxowYUdg"));
        assert_eq!(out.text, "");
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn canonical_url_can_identify_provider() {
        let source = StubSource {
            meta: Some(PageMetadata {
                canonical_url: Some("https://vimeo.com/76979871".into()),
                image: Some("https://cdn/x.jpg".into()),
                ..PageMetadata::default()
            }),
            ..StubSource::default()
        };
        let (out, _) = embed(source, img("https://short.link/abc", "v")).await;
        assert_eq!(out.tag_name, "iframe");
        assert_eq!(out.attr("src"), Some("https://player.vimeo.com/video/76979871"));
    }

    #[tokio::test]
    async fn open_graph_image_replaces_source() {
        let source = StubSource {
            meta: Some(PageMetadata {
                image: Some("https://cdn.example.com/og.png".into()),
                ..PageMetadata::default()
            }),
            ..StubSource::default()
        };
        let (out, _) = embed(source, img("https://example.com/article", "cover")).await;
        assert_eq!(out.tag_name, "img");
        assert_eq!(out.attr("src"), Some("https://cdn.example.com/og.png"));
        assert_eq!(out.attr("alt"), Some("cover"));
    }

    #[tokio::test]
    async fn pdf_gets_viewer_iframe() {
        let source = StubSource {
            meta: Some(PageMetadata::default()),
            mime: Some("application/pdf".into()),
            ..StubSource::default()
        };
        let (out, _) = embed(source, img("https://example.com/paper.pdf", "paper")).await;
        assert_eq!(out.tag_name, "iframe");
        assert_eq!(
            out.attr("src"),
            Some("https://docs.google.com/viewer?embedded=true&url=https%3A%2F%2Fexample.com%2Fpaper.pdf")
        );
    }

    #[tokio::test]
    async fn lookup_failures_fall_through_to_safe_link() {
        let (out, calls) = embed(
            StubSource::default(),
            img("https://example.com/cat.png", "a cat"),
        )
        .await;
        assert_eq!(out.tag_name, "a");
        assert_eq!(out.attr("href"), Some("https://example.com/cat.png"));
        assert_eq!(out.text, "a cat");
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn script_sources_keep_only_their_text() {
        let (out, calls) = embed(
            StubSource::default(),
            img("javascript:alert(document.cookie)", "x"),
        )
        .await;
        assert_eq!(out.tag_name, "span");
        assert!(out.attributes.is_empty());
        assert_eq!(out.text, "x");
        assert_eq!(calls, 0);

        let (relative, calls) = embed(StubSource::default(), img("cat.png", "cat")).await;
        assert_eq!(relative.tag_name, "a");
        assert_eq!(relative.attr("href"), Some("cat.png"));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn script_open_graph_image_is_ignored() {
        let source = StubSource {
            meta: Some(PageMetadata {
                image: Some("javascript:alert(1)".into()),
                ..PageMetadata::default()
            }),
            ..StubSource::default()
        };
        let (out, _) = embed(source, img("https://example.com/article", "cover")).await;
        assert_eq!(out.tag_name, "a");
        assert_eq!(out.attr("href"), Some("https://example.com/article"));
    }

    #[tokio::test]
    async fn safe_link_without_alt_uses_source() {
        let source = StubSource {
            meta: Some(PageMetadata::default()),
            mime: Some("image/png".into()),
            ..StubSource::default()
        };
        let (out, _) = embed(source, img("https://example.com/cat.png", "")).await;
        assert_eq!(out.tag_name, "a");
        assert_eq!(out.text, "https://example.com/cat.png");
    }
}
