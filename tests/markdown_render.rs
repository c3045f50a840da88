use std::sync::Arc;
use std::time::{Duration, Instant};

use linkhub::markdown::{MarkdownRenderer, MediaEmbedder, MAX_NESTING};
use linkhub::metadata::{MetadataSource, OfflineMetadataSource, PageMetadata, UpstreamError};

/// Canned metadata for every URL.
#[derive(Default)]
struct Canned {
    meta: Option<PageMetadata>,
    mime: Option<String>,
}

#[async_trait::async_trait]
impl MetadataSource for Canned {
    async fn metadata(&self, _url: &str) -> Result<PageMetadata, UpstreamError> {
        self.meta.clone().ok_or(UpstreamError::Disabled)
    }

    async fn mimetype(&self, _url: &str) -> Result<Option<String>, UpstreamError> {
        Ok(self.mime.clone())
    }
}

fn renderer(redirect: Option<&str>, source: Arc<dyn MetadataSource>) -> MarkdownRenderer {
    MarkdownRenderer::standard(
        redirect.map(str::to_string),
        MediaEmbedder::new(source, "https://viewer.example/?embedded=true"),
    )
}

fn offline() -> MarkdownRenderer {
    renderer(None, Arc::new(OfflineMetadataSource))
}

#[tokio::test]
async fn youtube_image_becomes_iframe() {
    let out = offline()
        .render("![clip](https://www.youtube.com/watch?v=UHkjxowYUdg)")
        .await;
    assert!(out.html.contains("<iframe"));
    assert!(out
        .html
        .contains(r#"src="https://www.youtube.com/embed/UHkjxowYUdg""#));
    assert!(!out.html.contains("<img"));
}

#[tokio::test]
async fn outline_needs_at_least_three_headings() {
    let two = offline().render("# One\n\ntext\n\n## Two\n").await;
    assert!(two.outline.is_none());

    let five = offline()
        .render("# A\n\n## B\n\n### C\n\n## D\n\n# E\n\n#### not counted\n")
        .await;
    let outline = five.outline.expect("five headings produce an outline");
    assert_eq!(outline.len(), 5);
    let anchors: Vec<_> = outline.iter().map(|e| e.anchor.as_str()).collect();
    assert_eq!(
        anchors,
        vec!["section-1", "section-2", "section-3", "section-4", "section-5"]
    );
    assert_eq!(outline[2].level, 3);
    assert_eq!(outline[2].text, "C");
    assert!(five.html.contains(r#"<h3 id="section-3">C</h3>"#));
}

#[tokio::test]
async fn oversized_outline_is_dropped() {
    let long = "x".repeat(300);
    let source = format!("# {long}\n\n# {long}\n\n# {long}\n");
    assert!(offline().render(&source).await.outline.is_none());
}

#[tokio::test]
async fn links_go_through_the_redirector() {
    let out = renderer(Some("https://redir/"), Arc::new(OfflineMetadataSource))
        .render("[site](http://example.com) and [top](#top)")
        .await;
    assert!(out
        .html
        .contains(r#"<a href="https://redir/http://example.com" target="_blank">site</a>"#));
    assert!(out.html.contains(r##"<a href="#top">top</a>"##));
}

#[tokio::test]
async fn open_graph_image_replaces_page_link() {
    let source = Canned {
        meta: Some(PageMetadata {
            image: Some("https://cdn.example/cover.png".into()),
            ..PageMetadata::default()
        }),
        mime: None,
    };
    let out = renderer(None, Arc::new(source))
        .render("![cover](https://news.example/story)")
        .await;
    assert!(out.html.contains(r#"src="https://cdn.example/cover.png""#));
    assert!(out.html.contains(r#"alt="cover""#));
    assert_eq!(out.cover_image.as_deref(), Some("https://news.example/story"));
}

#[tokio::test]
async fn canonical_provider_url_is_embedded() {
    let source = Canned {
        meta: Some(PageMetadata {
            canonical_url: Some("https://vimeo.com/76979871".into()),
            ..PageMetadata::default()
        }),
        mime: None,
    };
    let out = renderer(None, Arc::new(source))
        .render("![talk](https://short.example/abc)")
        .await;
    assert!(out
        .html
        .contains(r#"src="https://player.vimeo.com/video/76979871""#));
}

#[tokio::test]
async fn pdf_goes_through_the_viewer() {
    let source = Canned {
        meta: None,
        mime: Some("application/pdf".into()),
    };
    let out = renderer(None, Arc::new(source))
        .render("![paper](https://papers.example/a.pdf)")
        .await;
    assert!(out.html.contains(r#"class="embed embed-pdf""#));
    assert!(out.html.contains("https://viewer.example/?embedded=true&amp;url=https%3A%2F%2Fpapers.example%2Fa.pdf"));
}

#[tokio::test]
async fn unreachable_media_falls_back_to_a_link() {
    let out = renderer(Some("https://redir/"), Arc::new(OfflineMetadataSource))
        .render("![diagram](https://img.example/x.png)")
        .await;
    assert!(!out.html.contains("<img"));
    assert!(out.html.contains(
        r#"<a href="https://redir/https://img.example/x.png" target="_blank">diagram</a>"#
    ));
}

#[tokio::test]
async fn concurrent_renders_do_not_share_state() {
    let r = offline();
    let (a, b) = tokio::join!(
        r.render("# First\n\n*alpha* text"),
        r.render("# Second\n\n**beta** text")
    );
    assert_eq!(a.tags, vec!["alpha"]);
    assert_eq!(a.title.as_deref(), Some("First"));
    assert_eq!(b.tags, vec!["beta"]);
    assert_eq!(b.title.as_deref(), Some("Second"));
}

#[tokio::test]
async fn raw_html_is_escaped() {
    let out = offline().render("hello <script>alert(1)</script>").await;
    assert!(!out.html.contains("<script>"));
    assert!(out.html.contains("&lt;script&gt;"));
}

#[tokio::test]
async fn deeply_nested_quotes_render() {
    let source = format!("{}deep", "> ".repeat(500));
    let out = offline().render(&source).await;
    assert!(out.html.contains("deep"));
}

#[tokio::test]
async fn twenty_thousand_nested_quotes_render_quickly() {
    let source = format!("{}x", "> ".repeat(20_000));
    let started = Instant::now();
    let out = offline().render(&source).await;
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "render took {:?}", elapsed);
    assert!(out.html.contains(">x</blockquote>"));
    assert_eq!(out.html.matches("<blockquote>").count(), MAX_NESTING);
}

#[tokio::test]
async fn long_text_under_deep_lists_stays_linear() {
    let source = format!("{}{}", "- ".repeat(2_000), "word ".repeat(10_000));
    let started = Instant::now();
    let out = offline().render(&source).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(out.html.matches("word").count(), 10_000);
}

#[tokio::test]
async fn script_urls_never_reach_the_html() {
    let out = renderer(Some("https://go.example/?u="), Arc::new(OfflineMetadataSource))
        .render(
            "[click](javascript:alert(document.cookie)) \
             [Click](JAVASCRIPT:alert(1)) \
             ![pic](javascript:alert(2)) \
             [fine](https://example.com)",
        )
        .await;
    assert!(!out.html.to_ascii_lowercase().contains("javascript:"), "{}", out.html);
    assert!(out.html.contains("<a>click</a>"));
    assert!(out.html.contains("<span>pic</span>"));
    assert!(out
        .html
        .contains(r#"<a href="https://go.example/?u=https://example.com" target="_blank">fine</a>"#));

    let plain = offline()
        .render("[click](javascript:alert(document.cookie)) [x](javascript:alert(1))")
        .await;
    assert_eq!(plain.html, "<p><a>click</a> <a>x</a></p>\n");
}
