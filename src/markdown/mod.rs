//! Markdown rendering with an element filter chain.
//!
//! pulldown-cmark events are assembled into an element tree.  Every element
//! is then visited in document order and handed to each [`ElementFilter`]
//! in turn; a filter may rewrite the tag, attributes or text, or pass the
//! node through untouched.  Filters record what they harvest in a
//! [`RenderContext`] owned by the render call, which is folded into the
//! returned [`RenderOutput`].

use std::collections::BTreeMap;
use std::sync::Arc;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};
use serde::Serialize;

use crate::util::escape_html;

pub mod link_decorator;
pub mod media_embedder;
pub mod outline;
pub mod tag_harvester;

pub use self::link_decorator::LinkDecorator;
pub use self::media_embedder::MediaEmbedder;
pub use self::outline::{OutlineEntry, OutlineGenerator};
pub use self::tag_harvester::TagHarvester;

/// One HTML element as seen by the filter chain.  `text` is the plain text
/// of the element's subtree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementNode {
    pub tag_name: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
}

impl ElementNode {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag_name.eq_ignore_ascii_case(tag)
    }
}

/// Per-render accumulator shared by the filters of one render call.
#[derive(Debug, Default)]
pub struct RenderContext {
    pub tags: Vec<String>,
    pub cover_image: Option<String>,
    pub title: Option<String>,
    pub outline: Vec<OutlineEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    pub html: String,
    pub tags: Vec<String>,
    pub cover_image: Option<String>,
    pub title: Option<String>,
    pub outline: Option<Vec<OutlineEntry>>,
}

#[async_trait::async_trait]
pub trait ElementFilter: Send + Sync {
    fn name(&self) -> &str;
    async fn filter(&self, node: ElementNode, ctx: &mut RenderContext) -> ElementNode;
}

/// Renders Markdown through a fixed, ordered list of element filters.
#[derive(Clone)]
pub struct MarkdownRenderer {
    filters: Vec<Arc<dyn ElementFilter>>,
}

impl MarkdownRenderer {
    pub fn new(filters: Vec<Arc<dyn ElementFilter>>) -> Self {
        Self { filters }
    }

    /// The standard chain: harvesters first so they observe elements as
    /// authored, then the media embedder, then the link decorator so links
    /// produced by the embedder are decorated too.
    pub fn standard(redirect_base: Option<String>, media: MediaEmbedder) -> Self {
        Self::new(vec![
            Arc::new(TagHarvester),
            Arc::new(OutlineGenerator),
            Arc::new(media),
            Arc::new(LinkDecorator::new(redirect_base)),
        ])
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub async fn render(&self, source: &str) -> RenderOutput {
        let mut doc = Document::parse(source);
        let mut ctx = RenderContext::default();
        // Descendants are untouched until their ancestor has been filtered,
        // so subtree text gathered up front matches what the walk would see.
        let mut texts = doc.subtree_texts();

        // Pre-order walk with an explicit stack; nesting depth is user input.
        let mut stack: Vec<usize> = doc.roots.iter().rev().filter_map(Child::element).collect();
        while let Some(idx) = stack.pop() {
            let mut node = ElementNode {
                tag_name: doc.elements[idx].tag.clone(),
                text: std::mem::take(&mut texts[idx]),
                attributes: doc.elements[idx].attributes.clone(),
            };
            let original_text = node.text.clone();
            for filter in &self.filters {
                node = filter.filter(node, &mut ctx).await;
            }
            let element = &mut doc.elements[idx];
            element.tag = node.tag_name;
            element.attributes = node.attributes;
            if node.text != original_text {
                element.children = if node.text.is_empty() {
                    Vec::new()
                } else {
                    vec![Child::Text(node.text)]
                };
            }
            stack.extend(element.children.iter().rev().filter_map(Child::element));
        }

        let html = doc.to_html();
        let outline = outline::finish(std::mem::take(&mut ctx.outline));
        tracing::trace!(
            html_len = html.len(),
            tags = ctx.tags.len(),
            has_outline = outline.is_some(),
            "rendered markdown"
        );
        RenderOutput {
            html,
            tags: ctx.tags,
            cover_image: ctx.cover_image,
            title: ctx.title,
            outline,
        }
    }
}

#[derive(Clone, Debug)]
enum Child {
    Text(String),
    Element(usize),
}

impl Child {
    fn element(&self) -> Option<usize> {
        match self {
            Child::Element(idx) => Some(*idx),
            Child::Text(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
struct Element {
    tag: String,
    attributes: BTreeMap<String, String>,
    children: Vec<Child>,
}

/// Deepest element nesting kept from the source.  Start tags past this
/// depth open nothing and their content joins the innermost open element.
pub const MAX_NESTING: usize = 64;

const VOID_TAGS: &[&str] = &["img", "br", "hr", "input"];
const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "ul", "ol", "li", "table",
    "thead", "tr", "hr", "div", "iframe",
];

/// Arena-backed element tree built from pulldown-cmark events.
#[derive(Debug, Default)]
struct Document {
    elements: Vec<Element>,
    roots: Vec<Child>,
}

impl Document {
    fn parse(source: &str) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_FOOTNOTES);

        let mut doc = Document::default();
        let mut open: Vec<usize> = Vec::new();
        // how many elements each Start pushed, so End can pop them again
        let mut pushed: Vec<usize> = Vec::new();
        let mut in_table_head = false;

        for event in Parser::new_ext(source, options) {
            match event {
                Event::Start(tag) => {
                    let opened = open_elements(&tag, in_table_head);
                    if open.len() + opened.len() > MAX_NESTING {
                        pushed.push(0);
                        continue;
                    }
                    if matches!(tag, Tag::TableHead) {
                        in_table_head = true;
                    }
                    pushed.push(opened.len());
                    for (name, attrs) in opened {
                        let idx = doc.push(&open, name, attrs);
                        open.push(idx);
                    }
                }
                Event::End(_) => {
                    let count = pushed.pop().unwrap_or(0);
                    for _ in 0..count {
                        if let Some(idx) = open.pop() {
                            if doc.elements[idx].tag == "thead" {
                                in_table_head = false;
                            }
                            if doc.elements[idx].tag == "img" {
                                let alt = doc.text_of(idx);
                                doc.elements[idx].attributes.insert("alt".into(), alt);
                            }
                        }
                    }
                }
                Event::Text(text) | Event::Html(text) | Event::InlineHtml(text) => {
                    doc.push_text(&open, text.to_string());
                }
                Event::Code(code) => {
                    let idx = doc.push(&open, "code", BTreeMap::new());
                    doc.elements[idx].children.push(Child::Text(code.to_string()));
                }
                Event::SoftBreak => doc.push_text(&open, "\n".to_string()),
                Event::HardBreak => {
                    doc.push(&open, "br", BTreeMap::new());
                }
                Event::Rule => {
                    doc.push(&open, "hr", BTreeMap::new());
                }
                Event::TaskListMarker(checked) => {
                    let mut attrs = BTreeMap::new();
                    attrs.insert("type".to_string(), "checkbox".to_string());
                    attrs.insert("disabled".to_string(), String::new());
                    if checked {
                        attrs.insert("checked".to_string(), String::new());
                    }
                    doc.push(&open, "input", attrs);
                }
                Event::FootnoteReference(label) => {
                    let sup = doc.push(&open, "sup", BTreeMap::new());
                    let mut attrs = BTreeMap::new();
                    attrs.insert("href".to_string(), format!("#fn-{}", label));
                    let a = doc.push(&[sup], "a", attrs);
                    doc.elements[a].children.push(Child::Text(label.to_string()));
                }
                #[allow(unreachable_patterns)]
                _ => {}
            }
        }
        doc
    }

    fn push(&mut self, open: &[usize], tag: &str, attributes: BTreeMap<String, String>) -> usize {
        let idx = self.elements.len();
        self.elements.push(Element {
            tag: tag.to_string(),
            attributes,
            children: Vec::new(),
        });
        match open.last() {
            Some(parent) => self.elements[*parent].children.push(Child::Element(idx)),
            None => self.roots.push(Child::Element(idx)),
        }
        idx
    }

    fn push_text(&mut self, open: &[usize], text: String) {
        let children = match open.last() {
            Some(parent) => &mut self.elements[*parent].children,
            None => &mut self.roots,
        };
        if let Some(Child::Text(last)) = children.last_mut() {
            last.push_str(&text);
        } else {
            children.push(Child::Text(text));
        }
    }

    /// Plain text of every element's subtree, indexed like `elements`.
    /// Children always sit after their parent in the arena, so one reverse
    /// pass sees each child before its parent.
    fn subtree_texts(&self) -> Vec<String> {
        let mut texts = vec![String::new(); self.elements.len()];
        for idx in (0..self.elements.len()).rev() {
            let mut out = String::new();
            for child in &self.elements[idx].children {
                match child {
                    Child::Text(t) => out.push_str(t),
                    Child::Element(i) => out.push_str(&texts[*i]),
                }
            }
            texts[idx] = out;
        }
        texts
    }

    fn text_of(&self, idx: usize) -> String {
        let mut out = String::new();
        let mut stack: Vec<&Child> = self.elements[idx].children.iter().rev().collect();
        while let Some(child) = stack.pop() {
            match child {
                Child::Text(t) => out.push_str(t),
                Child::Element(i) => stack.extend(self.elements[*i].children.iter().rev()),
            }
        }
        out
    }

    fn to_html(&self) -> String {
        enum Step<'a> {
            Visit(&'a Child),
            Close(usize),
        }

        let mut out = String::new();
        let mut stack: Vec<Step<'_>> = self.roots.iter().rev().map(Step::Visit).collect();
        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(Child::Text(t)) => out.push_str(&escape_html(t)),
                Step::Visit(Child::Element(idx)) => {
                    let el = &self.elements[*idx];
                    out.push('<');
                    out.push_str(&el.tag);
                    for (k, v) in &el.attributes {
                        out.push(' ');
                        out.push_str(k);
                        out.push_str("=\"");
                        out.push_str(&escape_html(v));
                        out.push('"');
                    }
                    if VOID_TAGS.contains(&el.tag.as_str()) {
                        out.push_str(" />");
                        if BLOCK_TAGS.contains(&el.tag.as_str()) {
                            out.push('\n');
                        }
                        continue;
                    }
                    out.push('>');
                    stack.push(Step::Close(*idx));
                    stack.extend(el.children.iter().rev().map(Step::Visit));
                }
                Step::Close(idx) => {
                    let tag = &self.elements[idx].tag;
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                    if BLOCK_TAGS.contains(&tag.as_str()) {
                        out.push('\n');
                    }
                }
            }
        }
        out
    }
}

fn attrs<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn heading_tag(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "h1",
        HeadingLevel::H2 => "h2",
        HeadingLevel::H3 => "h3",
        HeadingLevel::H4 => "h4",
        HeadingLevel::H5 => "h5",
        HeadingLevel::H6 => "h6",
    }
}

/// Elements opened by a pulldown-cmark start tag, outermost first.
fn open_elements(tag: &Tag<'_>, in_table_head: bool) -> Vec<(&'static str, BTreeMap<String, String>)> {
    match tag {
        Tag::Paragraph => vec![("p", BTreeMap::new())],
        Tag::Heading { level, .. } => vec![(heading_tag(*level), BTreeMap::new())],
        Tag::BlockQuote => vec![("blockquote", BTreeMap::new())],
        Tag::CodeBlock(kind) => {
            let lang = match kind {
                CodeBlockKind::Fenced(info) => info
                    .split_whitespace()
                    .next()
                    .map(|l| format!("language-{}", l))
                    .unwrap_or_default(),
                CodeBlockKind::Indented => String::new(),
            };
            vec![("pre", BTreeMap::new()), ("code", attrs([("class", lang)]))]
        }
        Tag::HtmlBlock => Vec::new(),
        Tag::List(Some(start)) if *start != 1 => {
            vec![("ol", attrs([("start", start.to_string())]))]
        }
        Tag::List(Some(_)) => vec![("ol", BTreeMap::new())],
        Tag::List(None) => vec![("ul", BTreeMap::new())],
        Tag::Item => vec![("li", BTreeMap::new())],
        Tag::FootnoteDefinition(label) => vec![(
            "div",
            attrs([
                ("class", "footnote-definition".to_string()),
                ("id", format!("fn-{}", label)),
            ]),
        )],
        Tag::Table(_) => vec![("table", BTreeMap::new())],
        Tag::TableHead => vec![("thead", BTreeMap::new()), ("tr", BTreeMap::new())],
        Tag::TableRow => vec![("tr", BTreeMap::new())],
        Tag::TableCell if in_table_head => vec![("th", BTreeMap::new())],
        Tag::TableCell => vec![("td", BTreeMap::new())],
        Tag::Emphasis => vec![("em", BTreeMap::new())],
        Tag::Strong => vec![("strong", BTreeMap::new())],
        Tag::Strikethrough => vec![("del", BTreeMap::new())],
        Tag::Link {
            dest_url, title, ..
        } => vec![(
            "a",
            attrs([("href", dest_url.to_string()), ("title", title.to_string())]),
        )],
        Tag::Image {
            dest_url, title, ..
        } => vec![(
            "img",
            attrs([("src", dest_url.to_string()), ("title", title.to_string())]),
        )],
        #[allow(unreachable_patterns)]
        _ => vec![("div", BTreeMap::new())],
    }
}
