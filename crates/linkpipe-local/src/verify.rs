//! Anchor verifier: the anchor must be something the model actually saw.

use linkpipe_core::LocatedSuggestion;

/// Strict, case-sensitive check that the anchor text occurs verbatim in both the
/// reduced content and the located block's text.
pub fn verify_anchor(located: &LocatedSuggestion, reduced_text: &str, block_text: &str) -> bool {
    let anchor = located.candidate.anchor_text.as_str();
    if anchor.is_empty() {
        return false;
    }
    reduced_text.contains(anchor) && block_text.contains(anchor)
}
