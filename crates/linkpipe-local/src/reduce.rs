//! Content reducer: boilerplate-free, bounded prompt text for the model.
//!
//! Runs on its own disposable parse; never touches the document used for insertion.

use crate::boilerplate::in_boilerplate;
use crate::document::rendered_text;
use crate::textprep::truncate_to_chars;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    /// Hard cap on reduced text, in chars.
    pub max_chars: usize,
    /// Paragraph-like blocks shorter than this are dropped (bylines, captions, buttons).
    pub min_paragraph_chars: usize,
    pub min_list_item_chars: usize,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            max_chars: 15_000,
            min_paragraph_chars: 25,
            min_list_item_chars: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReducedBlock {
    pub kind: &'static str, // "heading" | "paragraph" | "list_item"
    /// Character offset into `ReducedContent::text`.
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReducedContent {
    pub text: String,
    pub text_chars: usize,
    pub truncated: bool,
    pub blocks: Vec<ReducedBlock>,
}

const PARAGRAPH_TAGS: &[&str] = &["p", "blockquote", "td", "dd", "figcaption"];

fn push_block(
    blocks: &mut Vec<ReducedBlock>,
    out_text: &mut String,
    out_chars: &mut usize,
    kind: &'static str,
    rendered: String,
) {
    if !out_text.is_empty() {
        out_text.push_str("\n\n");
        *out_chars += 2;
    }
    let start_char = *out_chars;
    let n = rendered.chars().count();
    out_text.push_str(&rendered);
    *out_chars += n;
    blocks.push(ReducedBlock {
        kind,
        start_char,
        end_char: *out_chars,
        text: rendered,
    });
}

/// Reduce raw markup to headings, prose paragraphs and list bullets.
pub fn reduce(html: &str, cfg: &ReduceConfig) -> ReducedContent {
    let doc = html_scraper::Html::parse_document(html);
    let mut blocks: Vec<ReducedBlock> = Vec::new();
    let mut text = String::new();
    let mut chars = 0usize;

    let sel = html_scraper::Selector::parse("h1,h2,h3,p,li,blockquote,td,dd,figcaption").ok();
    let nested_p = html_scraper::Selector::parse("p").ok();
    if let Some(sel) = sel {
        for el in doc.select(&sel) {
            // Stop once the cap is reached; the final truncation clips the last block.
            if chars > cfg.max_chars {
                break;
            }
            if in_boilerplate(&el) {
                continue;
            }
            let tag = el.value().name();
            // Containers whose prose lives in child <p>s would duplicate it.
            if tag != "p" {
                if let Some(p) = &nested_p {
                    if el.select(p).next().is_some() {
                        continue;
                    }
                }
            }
            let body = rendered_text(&el);
            if body.is_empty() {
                continue;
            }
            let n = body.chars().count();
            let picked = match tag {
                "h1" => Some(("heading", format!("# {body}"))),
                "h2" => Some(("heading", format!("## {body}"))),
                "h3" => Some(("heading", format!("### {body}"))),
                "li" if n >= cfg.min_list_item_chars => Some(("list_item", format!("- {body}"))),
                t if PARAGRAPH_TAGS.contains(&t) && n >= cfg.min_paragraph_chars => {
                    Some(("paragraph", body))
                }
                _ => None,
            };
            if let Some((kind, rendered)) = picked {
                push_block(&mut blocks, &mut text, &mut chars, kind, rendered);
            }
        }
    }

    let (text, text_chars, truncated) = truncate_to_chars(&text, cfg.max_chars);
    blocks.retain(|b| b.start_char < text_chars);
    if let Some(last) = blocks.last_mut() {
        if last.end_char > text_chars {
            let keep = text_chars - last.start_char;
            last.text = last.text.chars().take(keep).collect();
            last.end_char = text_chars;
        }
    }

    ReducedContent {
        text,
        text_chars,
        truncated,
        blocks,
    }
}
