use serde::Serialize;

use super::{ElementFilter, ElementNode, RenderContext};

pub const MIN_HEADINGS: usize = 3;
pub const MAX_HEADINGS: usize = 16;
pub const MAX_SERIALIZED_CHARS: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutlineEntry {
    pub level: u8,
    pub anchor: String,
    pub text: String,
}

/// Anchors `<h1>`..`<h3>` with sequential ids and records them as outline
/// entries.
pub struct OutlineGenerator;

#[async_trait::async_trait]
impl ElementFilter for OutlineGenerator {
    fn name(&self) -> &str {
        "outline"
    }

    async fn filter(&self, mut node: ElementNode, ctx: &mut RenderContext) -> ElementNode {
        let level = match node.tag_name.as_str() {
            "h1" => 1,
            "h2" => 2,
            "h3" => 3,
            _ => return node,
        };
        let anchor = format!("section-{}", ctx.outline.len() + 1);
        node.attributes.insert("id".into(), anchor.clone());
        ctx.outline.push(OutlineEntry {
            level,
            anchor,
            text: node.text.trim().to_string(),
        });
        node
    }
}

/// Degenerate outlines are dropped entirely, never truncated.
pub fn finish(entries: Vec<OutlineEntry>) -> Option<Vec<OutlineEntry>> {
    if !(MIN_HEADINGS..=MAX_HEADINGS).contains(&entries.len()) {
        return None;
    }
    let serialized = serde_json::to_string(&entries).ok()?;
    if serialized.chars().count() >= MAX_SERIALIZED_CHARS {
        return None;
    }
    Some(entries)
}
