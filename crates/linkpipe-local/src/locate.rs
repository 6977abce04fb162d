//! Candidate locator: map a claimed paragraph onto the tightest real block.

use linkpipe_core::{BlockId, CandidateSuggestion, DocumentTree, LocatedSuggestion, TextSpan};

/// Smallest non-boilerplate block whose rendered text contains `claimed` exactly.
///
/// Returns the block and the claimed paragraph's span in document coordinates.
/// Ties on length go to the earlier block, except that a nested block covering the
/// same text wins over its wrapper.
pub fn find_tightest_block(doc: &dyn DocumentTree, claimed: &str) -> Option<(BlockId, TextSpan)> {
    let claimed = claimed.trim();
    if claimed.is_empty() {
        return None;
    }
    let mut best: Option<(BlockId, TextSpan, TextSpan)> = None;
    for b in doc.blocks() {
        if b.boilerplate || b.span.is_empty() {
            continue;
        }
        let Some(byte_idx) = b.text.find(claimed) else {
            continue;
        };
        if let Some((_, _, seen)) = &best {
            let tighter = b.span.len() < seen.len();
            let nested_same = b.span == *seen;
            if !tighter && !nested_same {
                continue;
            }
        }
        let start = b.span.start + b.text[..byte_idx].chars().count();
        let span = TextSpan::new(start, start + claimed.chars().count());
        best = Some((b.id, span, b.span));
    }
    best.map(|(id, span, _)| (id, span))
}

/// Locate one candidate. A miss is not an error: the model may quote text that does
/// not exist or was reformatted.
pub fn locate(doc: &dyn DocumentTree, candidate: &CandidateSuggestion) -> Option<LocatedSuggestion> {
    match find_tightest_block(doc, &candidate.claimed_paragraph) {
        Some((block, span)) => Some(LocatedSuggestion {
            candidate: candidate.clone(),
            block,
            span,
        }),
        None => {
            log::debug!(
                "unlocatable candidate anchor={:?} target={:?}",
                candidate.anchor_text,
                candidate.target_url
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HtmlDocument;

    #[test]
    fn prefers_the_tightest_containing_block() {
        let doc = HtmlDocument::parse(
            "<article><div><p>Intro text here.</p><p>Our pricing plans are flexible.</p></div></article>",
        );
        let c = CandidateSuggestion::new(
            "pricing plans",
            "/pricing",
            "Our pricing plans are flexible.",
        );
        let located = locate(&doc, &c).unwrap();
        let block = doc.block(located.block).unwrap();
        assert_eq!(block.tag, "p");
        assert_eq!(block.text, "Our pricing plans are flexible.");
        assert_eq!(located.span, block.span);
    }

    #[test]
    fn span_points_at_the_claimed_substring() {
        let doc = HtmlDocument::parse("<p>First sentence. Second sentence here.</p>");
        let (_, span) = find_tightest_block(&doc, "Second sentence").unwrap();
        let chars: Vec<char> = doc.text().chars().collect();
        let s: String = chars[span.start..span.end].iter().collect();
        assert_eq!(s, "Second sentence");
    }

    #[test]
    fn matching_is_case_sensitive_and_misses_are_silent() {
        let doc = HtmlDocument::parse("<p>Our pricing plans are flexible.</p>");
        let c = CandidateSuggestion::new("x", "/x", "our pricing plans");
        assert!(locate(&doc, &c).is_none());
        let hallucinated = CandidateSuggestion::new("x", "/x", "This sentence is not there.");
        assert!(locate(&doc, &hallucinated).is_none());
    }

    #[test]
    fn claims_spanning_blocks_fall_back_to_the_container() {
        let doc = HtmlDocument::parse("<div><p>Alpha one.</p><p>Beta two.</p></div>");
        let (id, _) = find_tightest_block(&doc, "one. Beta").unwrap();
        assert_eq!(doc.block(id).unwrap().tag, "div");
    }

    #[test]
    fn equal_length_wrappers_yield_to_the_inner_block() {
        let doc = HtmlDocument::parse("<article><p>Only paragraph in the article.</p></article>");
        let (id, _) = find_tightest_block(&doc, "Only paragraph").unwrap();
        assert_eq!(doc.block(id).unwrap().tag, "p");
    }

    #[test]
    fn identical_sibling_paragraphs_resolve_to_the_first() {
        let doc = HtmlDocument::parse("<p>Same words.</p><p>Same words.</p>");
        let (id, span) = find_tightest_block(&doc, "Same words.").unwrap();
        assert_eq!(id, BlockId(0));
        assert_eq!(span.start, 0);
    }

    #[test]
    fn boilerplate_blocks_are_never_targets() {
        let doc = HtmlDocument::parse("<footer><p>Our pricing plans are flexible.</p></footer>");
        assert!(find_tightest_block(&doc, "Our pricing plans").is_none());
    }
}
