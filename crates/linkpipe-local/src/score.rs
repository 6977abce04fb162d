//! Scorer / ranker.
//!
//! One policy for every scoring variant: a weighted mean of model sub-scores when the
//! model supplied any, otherwise a base score plus a role boost. Weights are data.

use crate::links::normalize_target;
use linkpipe_core::{Error, Inventory, Result, Role, SubScores};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleBoosts {
    pub high_value: f64,
    pub authority: f64,
    pub standard: f64,
}

impl Default for RoleBoosts {
    fn default() -> Self {
        Self {
            high_value: 30.0,
            authority: 20.0,
            standard: 0.0,
        }
    }
}

impl RoleBoosts {
    pub fn for_role(&self, role: Role) -> f64 {
        match role {
            Role::HighValue => self.high_value,
            Role::Authority => self.authority,
            Role::Standard => self.standard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    /// Sub-score name -> weight. Unknown names and non-positive weights are ignored.
    pub weights: BTreeMap<String, f64>,
    /// Upper end of the model's sub-score range.
    pub score_scale: f64,
    pub base_score: f64,
    pub role_boosts: RoleBoosts,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        let weights = [("relevance", 0.5), ("anchor_quality", 0.3), ("flow", 0.2)]
            .into_iter()
            .map(|(k, w)| (k.to_string(), w))
            .collect();
        Self {
            weights,
            score_scale: 10.0,
            base_score: 50.0,
            role_boosts: RoleBoosts::default(),
        }
    }
}

impl ScoringPolicy {
    /// Composite score in `[0, 100]`.
    pub fn score(&self, scores: &SubScores, role: Role) -> f64 {
        let scale = if self.score_scale > 0.0 {
            self.score_scale
        } else {
            1.0
        };
        let mut num = 0.0;
        let mut den = 0.0;
        for (name, v) in scores.named() {
            let w = self.weights.get(name).copied().unwrap_or(0.0);
            if w.is_nan() || w <= 0.0 {
                continue;
            }
            num += w * (v / scale).clamp(0.0, 1.0) * 100.0;
            den += w;
        }
        let raw = if den > 0.0 {
            num / den
        } else {
            self.base_score + self.role_boosts.for_role(role)
        };
        raw.clamp(0.0, 100.0)
    }
}

/// URL -> role: configured patterns first, then the inventory entry's role, then the
/// model's own tag.
#[derive(Debug, Clone)]
pub struct RoleClassifier {
    high_value: RegexSet,
    authority: RegexSet,
    known: BTreeMap<String, Role>,
    site_host: Option<String>,
}

impl RoleClassifier {
    pub fn new(inventory: &Inventory, site_host: Option<&str>) -> Result<Self> {
        let high_value = RegexSet::new(&inventory.high_value_patterns)
            .map_err(|e| Error::InvalidPattern(e.to_string()))?;
        let authority = RegexSet::new(&inventory.authority_patterns)
            .map_err(|e| Error::InvalidPattern(e.to_string()))?;
        let known = inventory
            .entries
            .iter()
            .filter_map(|e| e.role.map(|r| (normalize_target(&e.url, site_host), r)))
            .collect();
        Ok(Self {
            high_value,
            authority,
            known,
            site_host: site_host.map(|s| s.to_string()),
        })
    }

    pub fn classify(&self, url: &str, model_tag: Option<&str>) -> Role {
        if self.high_value.is_match(url) {
            return Role::HighValue;
        }
        if self.authority.is_match(url) {
            return Role::Authority;
        }
        let key = normalize_target(url, self.site_host.as_deref());
        if let Some(r) = self.known.get(&key) {
            return *r;
        }
        model_tag.map(Role::from_tag).unwrap_or(Role::Standard)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    pub words_per_link: usize,
    pub min_links: usize,
    pub max_links: usize,
    /// Flesch reading ease below this counts as hard to read.
    pub low_readability_threshold: f64,
    /// Multiplier applied to the target count for hard-to-read text.
    pub low_readability_factor: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            words_per_link: 150,
            min_links: 2,
            max_links: 12,
            low_readability_threshold: 30.0,
            low_readability_factor: 0.75,
        }
    }
}

/// How many links a document of this length and readability should carry.
pub fn target_count(word_count: usize, readability: Option<f64>, cfg: &RankConfig) -> usize {
    let min = cfg.min_links;
    let max = cfg.max_links.max(min);
    let mut n = (word_count / cfg.words_per_link.max(1)).clamp(min, max);
    if readability.is_some_and(|r| r < cfg.low_readability_threshold) {
        let reduced = (n as f64 * cfg.low_readability_factor).floor();
        n = (reduced.max(0.0) as usize).clamp(min, max);
    }
    n
}
