use super::{ElementFilter, ElementNode, RenderContext};
use crate::util::is_safe_href;

/// Routes outbound links through the redirector and opens them in a new
/// tab.  In-page anchors (`#...`) are left alone.  Links with a scheme other
/// than http, https or mailto lose their `href` and render as inert text.
pub struct LinkDecorator {
    redirect_base: Option<String>,
}

impl LinkDecorator {
    pub fn new(redirect_base: Option<String>) -> Self {
        Self {
            redirect_base: redirect_base.filter(|b| !b.trim().is_empty()),
        }
    }
}

#[async_trait::async_trait]
impl ElementFilter for LinkDecorator {
    fn name(&self) -> &str {
        "link_decorator"
    }

    async fn filter(&self, mut node: ElementNode, _ctx: &mut RenderContext) -> ElementNode {
        if !node.is("a") {
            return node;
        }
        let href = match node.attr("href") {
            Some(h) if !h.starts_with('#') => h.to_string(),
            _ => return node,
        };
        if !is_safe_href(&href) {
            tracing::debug!(href = %href, "dropping link with unsafe scheme");
            node.attributes.remove("href");
            return node;
        }
        if let Some(base) = &self.redirect_base {
            if !href.starts_with(base.as_str()) {
                node.attributes
                    .insert("href".into(), format!("{}{}", base, href));
            }
        }
        node.attributes.insert("target".into(), "_blank".into());
        node
    }
}
