//! Insertion engine and markup sanitizer.
//!
//! The block's current inner markup is re-parsed into a throwaway fragment, the first
//! eligible text occurrence of the anchor is wrapped in `<a href>`, and the whole fragment
//! is serialized through an allow-list before it replaces the block's children.

use crate::textprep::find_ws_flexible;
use ego_tree::NodeRef;
use html_scraper::{Html, Node};
use linkpipe_core::{BlockId, DocumentTree};

/// Dropped together with everything inside them.
pub const DISALLOWED_TAGS: &[&str] = &[
    "script", "style", "iframe", "frame", "object", "embed", "applet", "video", "audio",
    "source", "track", "img", "picture", "canvas", "svg", "math", "form", "input", "button",
    "select", "option", "textarea", "label", "fieldset", "noscript", "template", "link",
    "meta", "base",
];

const VOID_TAGS: &[&str] = &["br", "hr", "wbr", "col", "area"];

const UNSAFE_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:"];

#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("anchor {0:?} has no eligible text occurrence")]
    NoEligibleText(String),
    #[error("target {0:?} uses a disallowed scheme")]
    UnsafeTarget(String),
    #[error(transparent)]
    Document(#[from] linkpipe_core::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    /// Sanitized outer markup of the block (tag without attributes).
    pub insertion_html: String,
    /// Sanitized inner markup now living in the document.
    pub inner_html: String,
}

/// False for hrefs a browser would execute or inline.
pub fn is_safe_href(href: &str) -> bool {
    // Browsers ignore embedded tabs/newlines and leading control chars in schemes.
    let squeezed: String = href
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    !UNSAFE_SCHEMES.iter().any(|s| squeezed.starts_with(s))
}

fn escape_text(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

/// What to wrap, and whether it has been wrapped yet.
struct Injection<'a> {
    anchor: &'a str,
    href: &'a str,
    done: bool,
}

fn write_node(node: NodeRef<'_, Node>, in_link: bool, inj: &mut Option<Injection<'_>>, out: &mut String) {
    match node.value() {
        Node::Text(t) => {
            let text: &str = t;
            if let Some(i) = inj.as_mut().filter(|i| !i.done && !in_link) {
                if let Some((s, e)) = find_ws_flexible(text, i.anchor) {
                    escape_text(&text[..s], out);
                    out.push_str("<a href=\"");
                    escape_attr(i.href, out);
                    out.push_str("\">");
                    escape_text(&text[s..e], out);
                    out.push_str("</a>");
                    escape_text(&text[e..], out);
                    i.done = true;
                    return;
                }
            }
            escape_text(text, out);
        }
        Node::Element(el) => {
            let name = el.name();
            if DISALLOWED_TAGS.contains(&name) {
                return;
            }
            out.push('<');
            out.push_str(name);
            if name == "a" {
                if let Some(href) = el.attr("href").filter(|h| is_safe_href(h)) {
                    out.push_str(" href=\"");
                    escape_attr(href, out);
                    out.push('"');
                }
            }
            out.push('>');
            if VOID_TAGS.contains(&name) {
                return;
            }
            let in_link = in_link || name == "a";
            for child in node.children() {
                write_node(child, in_link, inj, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        // Comments, doctypes and processing instructions are dropped.
        _ => {}
    }
}

fn serialize_fragment(markup: &str, inj: &mut Option<Injection<'_>>) -> String {
    let fragment = Html::parse_fragment(markup);
    let mut out = String::new();
    for child in fragment.root_element().children() {
        write_node(child, false, inj, &mut out);
    }
    out
}

/// Allow-list serialization of a markup fragment.
pub fn sanitize_fragment(markup: &str) -> String {
    serialize_fragment(markup, &mut None)
}

/// Wrap the first eligible occurrence of `anchor` inside `block` in a link to `target`.
///
/// Text already inside an `<a>`, or inside a disallowed element, is never eligible. On
/// any error the document is left untouched.
pub fn insert_link(
    doc: &mut dyn DocumentTree,
    block: BlockId,
    anchor: &str,
    target: &str,
) -> Result<InsertOutcome, InsertError> {
    if !is_safe_href(target) {
        return Err(InsertError::UnsafeTarget(target.to_string()));
    }
    let tag = doc
        .block(block)
        .map(|b| b.tag.clone())
        .ok_or_else(|| linkpipe_core::Error::Document(format!("unknown block {}", block.0)))?;
    let current = doc.inner_html(block)?;

    let mut inj = Some(Injection {
        anchor,
        href: target,
        done: false,
    });
    let inner_html = serialize_fragment(&current, &mut inj);
    if !inj.is_some_and(|i| i.done) {
        return Err(InsertError::NoEligibleText(anchor.to_string()));
    }

    doc.replace_inner_html(block, &inner_html)?;
    Ok(InsertOutcome {
        insertion_html: format!("<{tag}>{inner_html}</{tag}>"),
        inner_html,
    })
}
