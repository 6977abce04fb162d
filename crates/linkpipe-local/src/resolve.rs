//! Conflict resolver / deduplicator.
//!
//! Greedy single pass in descending score order. A candidate is admitted only if its
//! anchor, its target and its source span are all still free. Greedy is not a maximum
//! independent set: one high scorer may block two lower ones that would fit together.

use crate::links::normalize_target;
use crate::textprep::anchor_key;
use linkpipe_core::{LocatedSuggestion, RejectReason, Role, TextSpan};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Minimum gap, in document chars, between any two admitted source spans.
    pub min_distance: usize,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self { min_distance: 300 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSuggestion {
    pub located: LocatedSuggestion,
    pub role: Role,
    pub score: f64,
    pub prior: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Survivors, highest score first.
    pub admitted: Vec<ScoredSuggestion>,
    pub rejected: Vec<(ScoredSuggestion, RejectReason)>,
}

/// Admitted spans keyed by start. Admitted spans never overlap, so the nearest
/// conflicting span is always the predecessor or successor by start.
#[derive(Debug, Default)]
struct SpanIndex {
    by_start: BTreeMap<usize, usize>,
}

impl SpanIndex {
    fn conflicts(&self, span: &TextSpan, min_distance: usize) -> bool {
        let near = |s: usize, e: usize| {
            let other = TextSpan::new(s, e);
            let overlaps = span.start < other.end && other.start < span.end;
            overlaps || span.gap(&other) < min_distance
        };
        let pred = self.by_start.range(..=span.start).next_back();
        let succ = self.by_start.range(span.start + 1..).next();
        pred.is_some_and(|(s, e)| near(*s, *e)) || succ.is_some_and(|(s, e)| near(*s, *e))
    }

    fn insert(&mut self, span: TextSpan) {
        self.by_start.insert(span.start, span.end);
    }
}

pub fn sort_by_score(pool: &mut [ScoredSuggestion]) {
    // Stable: equal scores keep merge order (prior suggestions first).
    pool.sort_by(|a, b| b.score.total_cmp(&a.score));
}

pub fn resolve(
    mut pool: Vec<ScoredSuggestion>,
    cfg: &ResolveConfig,
    site_host: Option<&str>,
) -> Resolution {
    sort_by_score(&mut pool);

    let mut anchors: BTreeSet<String> = BTreeSet::new();
    let mut targets: BTreeSet<String> = BTreeSet::new();
    let mut spans = SpanIndex::default();
    let mut out = Resolution::default();

    for s in pool {
        let c = &s.located.candidate;
        let anchor = anchor_key(&c.anchor_text);
        let target = normalize_target(&c.target_url, site_host);
        let reason = if anchors.contains(&anchor) {
            Some(RejectReason::DuplicateAnchor)
        } else if targets.contains(&target) {
            Some(RejectReason::DuplicateTarget)
        } else if spans.conflicts(&s.located.span, cfg.min_distance) {
            Some(RejectReason::TooClose)
        } else {
            None
        };
        match reason {
            Some(r) => {
                log::debug!(
                    "dropping {} anchor={:?} target={:?} score={:.1}",
                    r.as_str(),
                    c.anchor_text,
                    c.target_url,
                    s.score
                );
                out.rejected.push((s, r));
            }
            None => {
                anchors.insert(anchor);
                targets.insert(target);
                spans.insert(s.located.span);
                out.admitted.push(s);
            }
        }
    }
    out
}
