//! `DocumentTree` over an html5ever parse (`scraper` + `ego_tree`).
//!
//! Rendered text is built in one in-order pass: whitespace runs collapse to a single
//! space, block boundaries and `<br>` separate runs, and script-like elements contribute
//! nothing. Block spans index into that text in chars.

use crate::boilerplate::in_boilerplate;
use ego_tree::iter::Edge;
use ego_tree::{NodeId, NodeRef, Tree};
use html_scraper::node::Element;
use html_scraper::{ElementRef, Html, Node};
use linkpipe_core::{Block, BlockId, DocumentTree, Error, Result, TextSpan};

/// Nodes that can host a suggestion.
pub const BLOCK_TAGS: &[&str] = &[
    "p",
    "li",
    "td",
    "th",
    "div",
    "section",
    "article",
    "main",
    "blockquote",
    "dd",
    "dt",
    "figcaption",
];

// Elements whose edges break rendered text into separate words.
const SEPARATOR_TAGS: &[&str] = &[
    "p", "li", "td", "th", "div", "section", "article", "main", "blockquote", "dd", "dt",
    "figcaption", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "dl", "table", "tr",
    "thead", "tbody", "tfoot", "br", "hr", "pre", "figure", "header", "footer", "nav",
    "aside", "address", "form",
];

const NON_RENDERED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

fn looks_like_full_document(markup: &str) -> bool {
    let head: String = markup
        .trim_start()
        .chars()
        .take(32)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype")
        || head.starts_with("<html")
        || head.starts_with("<head")
        || head.starts_with("<body")
        || markup.to_ascii_lowercase().contains("<body")
}

/// Incremental builder for rendered text.
#[derive(Debug, Default)]
struct RenderedText {
    text: String,
    chars: usize,
    pending_space: bool,
}

impl RenderedText {
    fn separate(&mut self) {
        self.pending_space = true;
    }

    fn push_text(&mut self, s: &str) {
        for ch in s.chars() {
            if ch.is_whitespace() {
                self.pending_space = true;
                continue;
            }
            if self.pending_space && !self.text.is_empty() {
                self.text.push(' ');
                self.chars += 1;
            }
            self.pending_space = false;
            self.text.push(ch);
            self.chars += 1;
        }
    }
}

/// Rendered text of one element subtree, under the same rules as `HtmlDocument`.
pub fn rendered_text(el: &ElementRef) -> String {
    let mut out = RenderedText::default();
    let mut hidden_depth = 0usize;
    for edge in el.traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(e) => {
                    if NON_RENDERED_TAGS.contains(&e.name()) {
                        hidden_depth += 1;
                    } else if hidden_depth == 0 && SEPARATOR_TAGS.contains(&e.name()) {
                        out.separate();
                    }
                }
                Node::Text(t) if hidden_depth == 0 => out.push_text(t),
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(e) = node.value() {
                    if NON_RENDERED_TAGS.contains(&e.name()) {
                        hidden_depth = hidden_depth.saturating_sub(1);
                    } else if hidden_depth == 0 && SEPARATOR_TAGS.contains(&e.name()) {
                        out.separate();
                    }
                }
            }
        }
    }
    out.text
}

fn inside_link(el: &ElementRef) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "a")
}

#[derive(Debug, Clone)]
pub struct HtmlDocument {
    html: Html,
    fragment: bool,
    text: String,
    blocks: Vec<Block>,
    nodes: Vec<NodeId>,
}

struct OpenBlock {
    index: usize,
    node: NodeId,
    start_byte: usize,
    start_char: usize,
}

impl HtmlDocument {
    /// Parse a full document or a body fragment (fragments serialize back as fragments).
    pub fn parse(markup: &str) -> Self {
        let fragment = !looks_like_full_document(markup);
        let html = if fragment {
            Html::parse_fragment(markup)
        } else {
            Html::parse_document(markup)
        };
        let mut doc = Self {
            html,
            fragment,
            text: String::new(),
            blocks: Vec::new(),
            nodes: Vec::new(),
        };
        doc.index();
        doc
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    fn index(&mut self) {
        let mut out = RenderedText::default();
        let mut hidden_depth = 0usize;
        let mut open: Vec<OpenBlock> = Vec::new();
        let mut blocks: Vec<Block> = Vec::new();
        let mut nodes: Vec<NodeId> = Vec::new();

        for edge in self.html.tree.root().traverse() {
            match edge {
                Edge::Open(node) => match node.value() {
                    Node::Element(el) => {
                        let name = el.name();
                        if NON_RENDERED_TAGS.contains(&name) {
                            hidden_depth += 1;
                            continue;
                        }
                        if hidden_depth > 0 {
                            continue;
                        }
                        if SEPARATOR_TAGS.contains(&name) {
                            out.separate();
                        }
                        if BLOCK_TAGS.contains(&name) {
                            let boilerplate = ElementRef::wrap(node)
                                .map(|e| in_boilerplate(&e) || inside_link(&e))
                                .unwrap_or(false);
                            let index = blocks.len();
                            blocks.push(Block {
                                id: BlockId(index),
                                tag: name.to_string(),
                                text: String::new(),
                                span: TextSpan::new(out.chars, out.chars),
                                boilerplate,
                            });
                            nodes.push(node.id());
                            open.push(OpenBlock {
                                index,
                                node: node.id(),
                                start_byte: out.text.len(),
                                start_char: out.chars,
                            });
                        }
                    }
                    Node::Text(t) if hidden_depth == 0 => out.push_text(t),
                    _ => {}
                },
                Edge::Close(node) => {
                    let Node::Element(el) = node.value() else {
                        continue;
                    };
                    let name = el.name();
                    if NON_RENDERED_TAGS.contains(&name) {
                        hidden_depth = hidden_depth.saturating_sub(1);
                        continue;
                    }
                    if hidden_depth > 0 {
                        continue;
                    }
                    if SEPARATOR_TAGS.contains(&name) {
                        out.separate();
                    }
                    if BLOCK_TAGS.contains(&name) && open.last().is_some_and(|o| o.node == node.id())
                    {
                        if let Some(o) = open.pop() {
                            let mut start_byte = o.start_byte;
                            let mut start_char = o.start_char;
                            // The deferred separator lands after the block opened.
                            if out.text[start_byte..].starts_with(' ') {
                                start_byte += 1;
                                start_char += 1;
                            }
                            let b = &mut blocks[o.index];
                            b.text = out.text[start_byte..].to_string();
                            b.span = TextSpan::new(start_char, out.chars);
                        }
                    }
                }
            }
        }

        self.text = out.text;
        self.blocks = blocks;
        self.nodes = nodes;
    }

    fn node_id(&self, id: BlockId) -> Result<NodeId> {
        self.nodes
            .get(id.0)
            .copied()
            .ok_or_else(|| Error::Document(format!("unknown block {}", id.0)))
    }

    /// False once an ancestor's content has been replaced.
    pub fn is_attached(&self, id: BlockId) -> bool {
        let Ok(node_id) = self.node_id(id) else {
            return false;
        };
        let root = self.html.tree.root().id();
        self.html
            .tree
            .get(node_id)
            .and_then(|n| n.ancestors().last())
            .is_some_and(|top| top.id() == root)
    }
}

fn graft(dst: &mut Tree<Node>, parent: NodeId, src: NodeRef<'_, Node>) -> Result<()> {
    for child in src.children() {
        let new_id = {
            let mut p = dst
                .get_mut(parent)
                .ok_or_else(|| Error::Document("graft target vanished".to_string()))?;
            p.append(child.value().clone()).id()
        };
        graft(dst, new_id, child)?;
    }
    Ok(())
}

impl DocumentTree for HtmlDocument {
    fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn inner_html(&self, id: BlockId) -> Result<String> {
        let node_id = self.node_id(id)?;
        let node = self
            .html
            .tree
            .get(node_id)
            .ok_or_else(|| Error::Document(format!("block {} has no node", id.0)))?;
        let el = ElementRef::wrap(node)
            .ok_or_else(|| Error::Document(format!("block {} is not an element", id.0)))?;
        Ok(el.inner_html())
    }

    fn replace_inner_html(&mut self, id: BlockId, markup: &str) -> Result<()> {
        let node_id = self.node_id(id)?;
        if !self.is_attached(id) {
            return Err(Error::Document(format!(
                "block {} was replaced by an enclosing edit",
                id.0
            )));
        }
        let fragment = Html::parse_fragment(markup);

        loop {
            let child = self
                .html
                .tree
                .get(node_id)
                .and_then(|n| n.first_child())
                .map(|c| c.id());
            let Some(child) = child else {
                break;
            };
            if let Some(mut c) = self.html.tree.get_mut(child) {
                c.detach();
            }
        }

        let src_root = fragment.root_element();
        graft(&mut self.html.tree, node_id, *src_root)?;

        // The rewritten node serializes as a bare tag.
        let mut node = self
            .html
            .tree
            .get_mut(node_id)
            .ok_or_else(|| Error::Document(format!("block {} has no node", id.0)))?;
        if let Node::Element(el) = node.value() {
            *el = Element::new(el.name.clone(), Vec::new());
        }
        Ok(())
    }

    fn to_html(&self) -> String {
        if self.fragment {
            self.html.root_element().inner_html()
        } else {
            self.html.html()
        }
    }
}
