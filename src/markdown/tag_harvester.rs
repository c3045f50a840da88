use super::{ElementFilter, ElementNode, RenderContext};

const MAX_TAG_CHARS: usize = 48;

/// Collects emphasised spans as candidate tags, the first image as cover
/// image and the first `<h1>` as title.
pub struct TagHarvester;

fn normalise_tag(raw: &str) -> Option<String> {
    let tag = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let len = tag.chars().count();
    if len == 0 || len > MAX_TAG_CHARS {
        return None;
    }
    Some(tag)
}

#[async_trait::async_trait]
impl ElementFilter for TagHarvester {
    fn name(&self) -> &str {
        "tag_harvester"
    }

    async fn filter(&self, node: ElementNode, ctx: &mut RenderContext) -> ElementNode {
        match node.tag_name.as_str() {
            "em" | "strong" | "i" | "b" => {
                if let Some(tag) = normalise_tag(&node.text) {
                    if !ctx.tags.contains(&tag) {
                        ctx.tags.push(tag);
                    }
                }
            }
            "img" => {
                if ctx.cover_image.is_none() {
                    ctx.cover_image = node.attr("src").map(str::to_string);
                }
            }
            "h1" => {
                let title = node.text.trim();
                if ctx.title.is_none() && !title.is_empty() {
                    ctx.title = Some(title.to_string());
                }
            }
            _ => {}
        }
        node
    }
}
