//! End-to-end validation and placement over one document.
//!
//! Sequential by construction: the resolver must see every candidate at once, and every
//! insertion mutates the same document.

use crate::document::HtmlDocument;
use crate::insert::insert_link;
use crate::links::{extract_existing_links, links_to, normalize_target, LinkScope};
use crate::locate::locate;
use crate::reduce::{reduce, ReduceConfig};
use crate::resolve::{resolve, ResolveConfig, ScoredSuggestion};
use crate::score::{target_count, RankConfig, RoleClassifier, ScoringPolicy};
use crate::textprep::{flesch_reading_ease, word_count};
use crate::verify::verify_anchor;
use linkpipe_core::{
    AcceptedSuggestion, CandidateSuggestion, DocumentTree, Error, Inventory, LocatedSuggestion,
    RejectReason, Rejection, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reduce: ReduceConfig,
    pub resolve: ResolveConfig,
    pub rank: RankConfig,
    pub scoring: ScoringPolicy,
    /// The site's own hostname; decides which absolute URLs are internal.
    pub site_host: Option<String>,
    /// URL of the document itself; links to it are rejected.
    pub page_url: Option<String>,
    /// Reject targets missing from a non-empty inventory.
    pub require_inventory_target: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// The document after every insertion.
    pub html: String,
    /// Placed suggestions, highest score first.
    pub accepted: Vec<AcceptedSuggestion>,
    pub rejected: Vec<Rejection>,
    /// Input problems that did not stop the run.
    pub issues: Vec<String>,
    pub total_candidates: usize,
    pub target_count: usize,
    pub reduced_chars: usize,
}

impl PipelineOutcome {
    pub fn summary(&self) -> String {
        format!(
            "{} of {} candidates accepted",
            self.accepted.len(),
            self.total_candidates
        )
    }
}

pub struct Pipeline {
    cfg: PipelineConfig,
}

/// Per-run lookups shared by the candidate checks.
struct RunContext<'a> {
    reduced_text: &'a str,
    site_host: Option<&'a str>,
    existing_targets: BTreeSet<String>,
    inventory_targets: BTreeSet<String>,
    page_target: Option<String>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Self {
        Self { cfg }
    }

    /// Validate `candidates` against `html`, resolve conflicts (together with `prior`
    /// accepted suggestions for the same document) and insert the survivors.
    ///
    /// Only a missing document is an error; every per-candidate failure becomes a
    /// `Rejection`.
    pub fn run(
        &self,
        html: &str,
        candidates: &[CandidateSuggestion],
        prior: &[AcceptedSuggestion],
        inventory: &Inventory,
    ) -> Result<PipelineOutcome> {
        if html.trim().is_empty() {
            return Err(Error::EmptyDocument);
        }
        let site_host = self.cfg.site_host.as_deref();
        let mut issues: Vec<String> = Vec::new();
        let mut rejected: Vec<Rejection> = Vec::new();

        let reduced = reduce(html, &self.cfg.reduce);
        let mut doc = HtmlDocument::parse(html);

        let scope = LinkScope::new(site_host)
            .with_known_urls(inventory.entries.iter().map(|e| e.url.as_str()));
        let existing_targets = extract_existing_links(html, &scope)
            .iter()
            .map(|l| normalize_target(&l.href, site_host))
            .collect();
        let ctx = RunContext {
            reduced_text: &reduced.text,
            site_host,
            existing_targets,
            inventory_targets: inventory
                .entries
                .iter()
                .map(|e| normalize_target(&e.url, site_host))
                .collect(),
            page_target: self
                .cfg
                .page_url
                .as_deref()
                .map(|u| normalize_target(u, site_host)),
        };

        let classifier = match RoleClassifier::new(inventory, site_host) {
            Ok(c) => c,
            Err(e) => {
                issues.push(format!("{e}; role patterns ignored"));
                let entries_only = Inventory {
                    entries: inventory.entries.clone(),
                    ..Inventory::default()
                };
                RoleClassifier::new(&entries_only, site_host)?
            }
        };

        let mut pool: Vec<ScoredSuggestion> = Vec::new();
        for p in prior {
            match self.recheck_prior(&doc, &ctx, p) {
                Ok(s) => pool.push(s),
                Err(r) => rejected.push(r),
            }
        }
        for c in candidates {
            if let Err(e) = c.validate() {
                issues.push(format!("candidate {:?}: {e}", c.anchor_text));
            }
            match self.check_candidate(&doc, &ctx, c) {
                Ok(located) => {
                    let role = classifier.classify(&c.target_url, c.target_type.as_deref());
                    let score = self.cfg.scoring.score(&c.scores, role);
                    pool.push(ScoredSuggestion {
                        located,
                        role,
                        score,
                        prior: false,
                    });
                }
                Err(r) => rejected.push(r),
            }
        }

        let resolution = resolve(pool, &self.cfg.resolve, site_host);
        for (s, reason) in &resolution.rejected {
            rejected.push(Rejection::new(&s.located.candidate, *reason));
        }

        let target = target_count(
            word_count(&reduced.text),
            flesch_reading_ease(&reduced.text),
            &self.cfg.rank,
        );

        let mut accepted: Vec<AcceptedSuggestion> = Vec::new();
        for s in resolution.admitted {
            let c = &s.located.candidate;
            if accepted.len() >= target {
                rejected.push(Rejection::new(c, RejectReason::OverTargetCount));
                continue;
            }
            // A prior suggestion whose link is already in its block stays as it is.
            let already_placed = s.prior
                && doc
                    .inner_html(s.located.block)
                    .is_ok_and(|m| links_to(&m, &c.target_url, site_host));
            let insertion_html = if already_placed {
                prior_insertion_html(prior, c)
            } else {
                match insert_link(&mut doc, s.located.block, &c.anchor_text, &c.target_url) {
                    Ok(out) => out.insertion_html,
                    Err(e) => {
                        log::debug!("unplaceable anchor={:?}: {e}", c.anchor_text);
                        rejected.push(
                            Rejection::new(c, RejectReason::Unplaceable).with_detail(e.to_string()),
                        );
                        continue;
                    }
                }
            };
            accepted.push(AcceptedSuggestion {
                candidate: s.located.candidate,
                block: s.located.block,
                span: s.located.span,
                role: s.role,
                score: s.score,
                insertion_html,
                prior: s.prior,
            });
        }

        let outcome = PipelineOutcome {
            html: doc.to_html(),
            accepted,
            rejected,
            issues,
            total_candidates: candidates.len() + prior.len(),
            target_count: target,
            reduced_chars: reduced.text_chars,
        };
        log::info!(
            "{} (target {}, {} rejected)",
            outcome.summary(),
            outcome.target_count,
            outcome.rejected.len()
        );
        Ok(outcome)
    }

    fn check_candidate(
        &self,
        doc: &HtmlDocument,
        ctx: &RunContext<'_>,
        c: &CandidateSuggestion,
    ) -> std::result::Result<LocatedSuggestion, Rejection> {
        if let Err(e) = c.validate() {
            return Err(reject(c, RejectReason::InvalidInput).with_detail(e.to_string()));
        }
        let target = normalize_target(&c.target_url, ctx.site_host);
        if self.cfg.require_inventory_target
            && !ctx.inventory_targets.is_empty()
            && !ctx.inventory_targets.contains(&target)
        {
            return Err(reject(c, RejectReason::UnknownTarget));
        }
        if ctx.page_target.as_deref() == Some(target.as_str()) {
            return Err(reject(c, RejectReason::SelfLink));
        }
        if ctx.existing_targets.contains(&target) {
            return Err(reject(c, RejectReason::AlreadyLinked));
        }
        locate_and_verify(doc, ctx, c)
    }

    fn recheck_prior(
        &self,
        doc: &HtmlDocument,
        ctx: &RunContext<'_>,
        p: &AcceptedSuggestion,
    ) -> std::result::Result<ScoredSuggestion, Rejection> {
        let c = &p.candidate;
        if let Err(e) = c.validate() {
            return Err(reject(c, RejectReason::InvalidInput).with_detail(e.to_string()));
        }
        let located = locate_and_verify(doc, ctx, c)?;
        Ok(ScoredSuggestion {
            located,
            role: p.role,
            score: p.score,
            prior: true,
        })
    }
}

fn reject(c: &CandidateSuggestion, reason: RejectReason) -> Rejection {
    log::debug!(
        "rejected {} anchor={:?} target={:?}",
        reason.as_str(),
        c.anchor_text,
        c.target_url
    );
    Rejection::new(c, reason)
}

fn locate_and_verify(
    doc: &HtmlDocument,
    ctx: &RunContext<'_>,
    c: &CandidateSuggestion,
) -> std::result::Result<LocatedSuggestion, Rejection> {
    let Some(located) = locate(doc, c) else {
        return Err(reject(c, RejectReason::Unlocatable));
    };
    let block_text = doc
        .block(located.block)
        .map(|b| b.text.as_str())
        .unwrap_or("");
    if !verify_anchor(&located, ctx.reduced_text, block_text) {
        return Err(reject(c, RejectReason::UnverifiedAnchor));
    }
    Ok(located)
}

fn prior_insertion_html(prior: &[AcceptedSuggestion], c: &CandidateSuggestion) -> String {
    prior
        .iter()
        .find(|p| p.candidate == *c)
        .map(|p| p.insertion_html.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkpipe_core::{InventoryEntry, Role, SubScores};

    fn filler(words: usize) -> String {
        let mut s = String::new();
        for i in 0..words {
            s.push_str(if i % 7 == 0 { "Context " } else { "words " });
        }
        s.trim_end().to_string()
    }

    fn with_relevance(mut c: CandidateSuggestion, r: f64) -> CandidateSuggestion {
        c.scores = SubScores {
            relevance: Some(r),
            ..SubScores::default()
        };
        c
    }

    fn reasons(o: &PipelineOutcome) -> Vec<(&str, RejectReason)> {
        o.rejected
            .iter()
            .map(|r| (r.anchor_text.as_str(), r.reason))
            .collect()
    }

    #[test]
    fn places_a_verified_suggestion() {
        let html = "<p>Our pricing plans are flexible.</p>";
        let c = CandidateSuggestion::new("pricing plans", "/pricing", "Our pricing plans are flexible.");
        let out = Pipeline::new(PipelineConfig::default())
            .run(html, &[c], &[], &Inventory::default())
            .unwrap();
        assert_eq!(
            out.html,
            r#"<p>Our <a href="/pricing">pricing plans</a> are flexible.</p>"#
        );
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.summary(), "1 of 1 candidates accepted");
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn inserted_links_are_reported_by_the_extractor() {
        let html = "<p>Our pricing plans are flexible.</p>";
        let c = CandidateSuggestion::new("pricing plans", "/Pricing/", "Our pricing plans are flexible.");
        let out = Pipeline::new(PipelineConfig::default())
            .run(html, &[c], &[], &Inventory::default())
            .unwrap();
        let links = extract_existing_links(&out.html, &LinkScope::new(None));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].anchor_text, "pricing plans");
        assert_eq!(links[0].normalized_path, "/pricing");
    }

    #[test]
    fn hallucinated_paragraph_is_dropped_silently() {
        let html = "<p>Our pricing plans are flexible.</p>";
        let c = CandidateSuggestion::new("pricing", "/pricing", "This sentence was never written.");
        let out = Pipeline::new(PipelineConfig::default())
            .run(html, &[c], &[], &Inventory::default())
            .unwrap();
        assert!(out.accepted.is_empty());
        assert_eq!(reasons(&out), vec![("pricing", RejectReason::Unlocatable)]);
        assert_eq!(out.html, html);
        assert_eq!(out.summary(), "0 of 1 candidates accepted");
    }

    #[test]
    fn anchor_only_inside_existing_link_is_unplaceable() {
        let html = r#"<p>Compare <a href="/compare">pricing plans</a> before you buy anything.</p>"#;
        let c = CandidateSuggestion::new(
            "pricing plans",
            "/pricing",
            "Compare pricing plans before you buy anything.",
        );
        let out = Pipeline::new(PipelineConfig::default())
            .run(html, &[c], &[], &Inventory::default())
            .unwrap();
        assert!(out.accepted.is_empty());
        assert_eq!(reasons(&out), vec![("pricing plans", RejectReason::Unplaceable)]);
        assert_eq!(out.html, html);
    }

    #[test]
    fn duplicate_targets_far_apart_keep_the_higher_score() {
        let p1 = "First section about pricing tiers.";
        let p2 = "Second section on cost options.";
        let html = format!("<p>{p1}</p><p>{}</p><p>{p2}</p>", filler(200));
        let low = with_relevance(CandidateSuggestion::new("pricing tiers", "/pricing", p1), 5.0);
        let high = with_relevance(CandidateSuggestion::new("cost options", "/pricing", p2), 9.0);
        let out = Pipeline::new(PipelineConfig::default())
            .run(&html, &[low, high], &[], &Inventory::default())
            .unwrap();
        let kept: Vec<&str> = out
            .accepted
            .iter()
            .map(|a| a.candidate.anchor_text.as_str())
            .collect();
        assert_eq!(kept, vec!["cost options"]);
        assert_eq!(
            reasons(&out),
            vec![("pricing tiers", RejectReason::DuplicateTarget)]
        );
    }

    #[test]
    fn nearby_paragraphs_are_spatial_duplicates() {
        let p1 = "Alpha paragraph mentions onboarding guides here.";
        let p2 = "Beta paragraph mentions billing questions here.";
        let html = format!("<p>{p1}</p><p>{p2}</p>");
        let a = with_relevance(CandidateSuggestion::new("onboarding guides", "/guides", p1), 4.0);
        let b = with_relevance(CandidateSuggestion::new("billing questions", "/billing", p2), 8.0);
        let out = Pipeline::new(PipelineConfig::default())
            .run(&html, &[a, b], &[], &Inventory::default())
            .unwrap();
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].candidate.anchor_text, "billing questions");
        assert_eq!(
            reasons(&out),
            vec![("onboarding guides", RejectReason::TooClose)]
        );
    }

    #[test]
    fn pre_insertion_checks_reject_with_reasons() {
        let html = r#"<p>Read <a href="/docs">the docs</a> and the pricing plans and the about page today.</p>"#;
        let para = "Read the docs and the pricing plans and the about page today.";
        let inventory = Inventory {
            entries: vec![
                InventoryEntry {
                    url: "/pricing".to_string(),
                    title: "Pricing".to_string(),
                    role: None,
                },
                InventoryEntry {
                    url: "/docs".to_string(),
                    title: "Docs".to_string(),
                    role: None,
                },
                InventoryEntry {
                    url: "/about".to_string(),
                    title: "About".to_string(),
                    role: None,
                },
            ],
            ..Inventory::default()
        };
        let cfg = PipelineConfig {
            page_url: Some("https://example.com/about/".to_string()),
            site_host: Some("example.com".to_string()),
            require_inventory_target: true,
            ..PipelineConfig::default()
        };
        let candidates = vec![
            CandidateSuggestion::new("", "/pricing", para),
            CandidateSuggestion::new("pricing plans", "/unknown", para),
            CandidateSuggestion::new("about page", "/about", para),
            CandidateSuggestion::new("docs", "/docs", para),
            CandidateSuggestion::new("Pricing Plans", "/pricing", para),
        ];
        let out = Pipeline::new(cfg)
            .run(html, &candidates, &[], &inventory)
            .unwrap();
        assert!(out.accepted.is_empty());
        assert_eq!(
            reasons(&out),
            vec![
                ("", RejectReason::InvalidInput),
                ("pricing plans", RejectReason::UnknownTarget),
                ("about page", RejectReason::SelfLink),
                ("docs", RejectReason::AlreadyLinked),
                ("Pricing Plans", RejectReason::UnverifiedAnchor),
            ]
        );
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.summary(), "0 of 5 candidates accepted");
    }

    #[test]
    fn stops_at_target_count_and_backfills_unplaceable() {
        let claims: Vec<String> = (0..4)
            .map(|i| format!("Topic {i} covers the subject number {i} well."))
            .collect();
        let mut html = String::new();
        for (i, claim) in claims.iter().enumerate() {
            let lead = if i == 0 {
                // Anchor only exists inside an existing link.
                claim.replacen("subject number 0", "<a href=\"/x\">subject number 0</a>", 1)
            } else {
                claim.clone()
            };
            html.push_str(&format!("<p>{lead} {}</p>", filler(120)));
        }
        let candidates: Vec<CandidateSuggestion> = claims
            .iter()
            .enumerate()
            .map(|(i, claim)| {
                with_relevance(
                    CandidateSuggestion::new(&format!("subject number {i}"), &format!("/t{i}"), claim),
                    10.0 - i as f64,
                )
            })
            .collect();
        let cfg = PipelineConfig {
            rank: RankConfig {
                min_links: 2,
                max_links: 2,
                ..RankConfig::default()
            },
            ..PipelineConfig::default()
        };
        let out = Pipeline::new(cfg)
            .run(&html, &candidates, &[], &Inventory::default())
            .unwrap();
        let kept: Vec<&str> = out
            .accepted
            .iter()
            .map(|a| a.candidate.target_url.as_str())
            .collect();
        assert_eq!(kept, vec!["/t1", "/t2"]);
        assert_eq!(
            reasons(&out),
            vec![
                ("subject number 0", RejectReason::Unplaceable),
                ("subject number 3", RejectReason::OverTargetCount),
            ]
        );
        assert_eq!(out.target_count, 2);
    }

    #[test]
    fn prior_suggestions_block_new_collisions_and_are_not_reinserted() {
        let html = "<p>Our pricing plans are flexible.</p>";
        let para = "Our pricing plans are flexible.";
        let pipeline = Pipeline::new(PipelineConfig::default());
        let first = pipeline
            .run(
                html,
                &[CandidateSuggestion::new("pricing plans", "/pricing", para)],
                &[],
                &Inventory::default(),
            )
            .unwrap();

        let second = pipeline
            .run(
                &first.html,
                &[CandidateSuggestion::new("flexible", "/plans", para)],
                &first.accepted,
                &Inventory::default(),
            )
            .unwrap();
        assert_eq!(second.html, first.html);
        assert_eq!(second.accepted.len(), 1);
        assert!(second.accepted[0].prior);
        assert_eq!(reasons(&second), vec![("flexible", RejectReason::TooClose)]);
        assert_eq!(second.summary(), "1 of 2 candidates accepted");
    }

    #[test]
    fn prior_with_absolute_target_and_no_site_host_is_kept_in_place() {
        let html = "<p>Our pricing plans are flexible.</p>";
        let para = "Our pricing plans are flexible.";
        let pipeline = Pipeline::new(PipelineConfig::default());
        let first = pipeline
            .run(
                html,
                &[CandidateSuggestion::new("pricing plans", "https://example.com/pricing", para)],
                &[],
                &Inventory::default(),
            )
            .unwrap();
        assert_eq!(first.accepted.len(), 1);

        let second = pipeline
            .run(&first.html, &[], &first.accepted, &Inventory::default())
            .unwrap();
        assert_eq!(second.html, first.html);
        assert_eq!(second.accepted.len(), 1);
        assert!(second.accepted[0].prior);
        assert_eq!(second.accepted[0].insertion_html, first.accepted[0].insertion_html);
        assert!(second.rejected.is_empty());
    }

    #[test]
    fn cms_body_and_article_classes_do_not_hide_content() {
        let para = "Our pricing plans are flexible.";
        let c = CandidateSuggestion::new("pricing plans", "/pricing", para);
        for html in [
            format!(
                r#"<!doctype html><html><body class="post-template-default single has-sidebar"><article><p>{para}</p></article></body></html>"#
            ),
            format!(
                r#"<!doctype html><html><body><article class="post type-post hentry tag-social-media"><p>{para}</p></article></body></html>"#
            ),
        ] {
            let out = Pipeline::new(PipelineConfig::default())
                .run(&html, std::slice::from_ref(&c), &[], &Inventory::default())
                .unwrap();
            assert!(out.reduced_chars > 0, "{html}");
            assert_eq!(out.accepted.len(), 1, "{html}");
            assert!(out
                .html
                .contains(r#"<p>Our <a href="/pricing">pricing plans</a> are flexible.</p>"#));
        }
    }

    #[test]
    fn role_boost_applies_without_sub_scores() {
        let html = "<p>Our pricing plans are flexible.</p>";
        let inventory = Inventory {
            high_value_patterns: vec!["^/pricing".to_string()],
            ..Inventory::default()
        };
        let c = CandidateSuggestion::new("pricing plans", "/pricing", "Our pricing plans are flexible.");
        let out = Pipeline::new(PipelineConfig::default())
            .run(html, &[c], &[], &inventory)
            .unwrap();
        assert_eq!(out.accepted[0].role, Role::HighValue);
        assert_eq!(out.accepted[0].score, 80.0);
    }

    #[test]
    fn bad_role_patterns_are_reported_but_do_not_stop_the_run() {
        let html = "<p>Our pricing plans are flexible.</p>";
        let inventory = Inventory {
            authority_patterns: vec!["[".to_string()],
            ..Inventory::default()
        };
        let c = CandidateSuggestion::new("pricing plans", "/pricing", "Our pricing plans are flexible.");
        let out = Pipeline::new(PipelineConfig::default())
            .run(html, &[c], &[], &inventory)
            .unwrap();
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.issues.len(), 1);
    }

    #[test]
    fn empty_document_is_an_error() {
        let err = Pipeline::new(PipelineConfig::default())
            .run("  \n ", &[], &[], &Inventory::default())
            .unwrap_err();
        assert!(matches!(err, Error::EmptyDocument));
    }

    #[test]
    fn accepted_anchors_are_verbatim_in_reduced_content() {
        let html = "<article><p>Teams love the reporting dashboard for weekly reviews.</p></article>";
        let c = CandidateSuggestion::new(
            "reporting dashboard",
            "/dashboard",
            "Teams love the reporting dashboard for weekly reviews.",
        );
        let cfg = PipelineConfig::default();
        let reduced = reduce(html, &cfg.reduce);
        let out = Pipeline::new(cfg)
            .run(html, &[c], &[], &Inventory::default())
            .unwrap();
        assert_eq!(out.accepted.len(), 1);
        for a in &out.accepted {
            assert!(reduced.text.contains(&a.candidate.anchor_text));
        }
    }
}
