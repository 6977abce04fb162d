use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("document is empty")]
    EmptyDocument,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("document error: {0}")]
    Document(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Index of a block-level node, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub usize);

/// Half-open interval in document character coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Distance between the closest edges of two spans (0 when they overlap or touch).
    pub fn gap(&self, other: &TextSpan) -> usize {
        if self.end <= other.start {
            other.start - self.end
        } else if other.end <= self.start {
            self.start - other.end
        } else {
            0
        }
    }
}

/// Snapshot of one block-level node (paragraph, list item, table cell, container).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub tag: String,
    /// Rendered text: whitespace-collapsed and trimmed.
    pub text: String,
    pub span: TextSpan,
    /// True when the node sits inside navigation/footer/ads/etc. or inside a link.
    pub boilerplate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingLink {
    pub anchor_text: String,
    pub href: String,
    pub normalized_path: String,
}

/// URL classification used to bias scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[serde(alias = "money", alias = "conversion")]
    HighValue,
    #[serde(alias = "pillar")]
    Authority,
    Standard,
}

impl Role {
    /// Lenient mapping from free-form model tags.
    pub fn from_tag(tag: &str) -> Self {
        let t = tag.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match t.as_str() {
            "high_value" | "highvalue" | "money" | "money_page" | "conversion" | "product"
            | "service" => Role::HighValue,
            "authority" | "pillar" | "pillar_page" | "cornerstone" | "hub" => Role::Authority,
            _ => Role::Standard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::HighValue => "high_value",
            Role::Authority => "authority",
            Role::Standard => "standard",
        }
    }
}

/// Numeric sub-scores a model may attach to a suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    #[serde(
        default,
        alias = "relevanceScore",
        alias = "relevance_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub relevance: Option<f64>,
    #[serde(
        default,
        alias = "anchorQuality",
        alias = "anchorScore",
        alias = "anchor_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub anchor_quality: Option<f64>,
    #[serde(
        default,
        alias = "flowScore",
        alias = "flow_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub flow: Option<f64>,
}

impl SubScores {
    /// Present sub-scores keyed by their weight names.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        let mut out = Vec::new();
        for (name, v) in [
            ("relevance", self.relevance),
            ("anchor_quality", self.anchor_quality),
            ("flow", self.flow),
        ] {
            if let Some(v) = v.filter(|v| v.is_finite()) {
                out.push((name, v));
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.named().is_empty()
    }
}

/// Untrusted, model-proposed link insertion.
///
/// Every field defaults so a single malformed record does not fail a whole batch;
/// `validate` reports missing required fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSuggestion {
    #[serde(default, alias = "anchorText", alias = "anchor")]
    pub anchor_text: String,
    #[serde(default, alias = "targetUrl", alias = "url")]
    pub target_url: String,
    #[serde(
        default,
        alias = "targetType",
        alias = "type",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_type: Option<String>,
    #[serde(
        default,
        alias = "claimedParagraph",
        alias = "paragraph",
        alias = "originalParagraph"
    )]
    pub claimed_paragraph: String,
    #[serde(
        default,
        alias = "claimedParagraphWithLink",
        alias = "paragraphWithLink",
        skip_serializing_if = "Option::is_none"
    )]
    pub claimed_paragraph_with_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, flatten)]
    pub scores: SubScores,
}

impl CandidateSuggestion {
    pub fn new(anchor_text: &str, target_url: &str, claimed_paragraph: &str) -> Self {
        Self {
            anchor_text: anchor_text.to_string(),
            target_url: target_url.to_string(),
            claimed_paragraph: claimed_paragraph.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.anchor_text.trim().is_empty() {
            missing.push("anchor_text");
        }
        if self.target_url.trim().is_empty() {
            missing.push("target_url");
        }
        if self.claimed_paragraph.trim().is_empty() {
            missing.push("claimed_paragraph");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

/// A candidate mapped onto a real document node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatedSuggestion {
    pub candidate: CandidateSuggestion,
    pub block: BlockId,
    /// Claimed paragraph interval in document character coordinates.
    pub span: TextSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedSuggestion {
    pub candidate: CandidateSuggestion,
    pub block: BlockId,
    pub span: TextSpan,
    pub role: Role,
    pub score: f64,
    /// Sanitized outer markup of the node after insertion.
    #[serde(default)]
    pub insertion_html: String,
    /// Carried over from an earlier run on the same document.
    #[serde(default)]
    pub prior: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidInput,
    UnknownTarget,
    SelfLink,
    AlreadyLinked,
    Unlocatable,
    UnverifiedAnchor,
    DuplicateAnchor,
    DuplicateTarget,
    TooClose,
    OverTargetCount,
    Unplaceable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidInput => "invalid_input",
            RejectReason::UnknownTarget => "unknown_target",
            RejectReason::SelfLink => "self_link",
            RejectReason::AlreadyLinked => "already_linked",
            RejectReason::Unlocatable => "unlocatable",
            RejectReason::UnverifiedAnchor => "unverified_anchor",
            RejectReason::DuplicateAnchor => "duplicate_anchor",
            RejectReason::DuplicateTarget => "duplicate_target",
            RejectReason::TooClose => "too_close",
            RejectReason::OverTargetCount => "over_target_count",
            RejectReason::Unplaceable => "unplaceable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub anchor_text: String,
    pub target_url: String,
    pub reason: RejectReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Rejection {
    pub fn new(candidate: &CandidateSuggestion, reason: RejectReason) -> Self {
        Self {
            anchor_text: candidate.anchor_text.clone(),
            target_url: candidate.target_url.clone(),
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Candidate link targets plus the URL patterns that mark special roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub entries: Vec<InventoryEntry>,
    /// Regex patterns matched against target URLs.
    #[serde(default)]
    pub high_value_patterns: Vec<String>,
    #[serde(default)]
    pub authority_patterns: Vec<String>,
}

/// Abstract, order-stable view of a parsed document.
///
/// Block snapshots keep original-document coordinates; only `replace_inner_html`
/// mutates, and only one node at a time.
pub trait DocumentTree {
    fn blocks(&self) -> &[Block];

    fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks().get(id.0)
    }

    /// Whole rendered text the block spans index into.
    fn text(&self) -> &str;

    /// Current inner markup of a block (reflects earlier replacements).
    fn inner_html(&self, id: BlockId) -> Result<String>;

    /// Replace a block's children with `markup` and drop the block element's own
    /// attributes. Fails for a block detached by an earlier replacement.
    fn replace_inner_html(&mut self, id: BlockId, markup: &str) -> Result<()>;

    fn to_html(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionRequest {
    /// Reduced document content; the only document view the model sees.
    pub reduced_content: String,
    pub inventory: Vec<InventoryEntry>,
    pub max_suggestions: usize,
}

/// External generative model that proposes candidate links.
#[async_trait::async_trait]
pub trait SuggestionModel: Send + Sync {
    fn name(&self) -> &str;
    async fn suggest(&self, req: &SuggestionRequest) -> Result<Vec<CandidateSuggestion>>;
}

/// Key/value JSON cache with caller-supplied expiry.
pub trait JsonCache: Send + Sync {
    /// Entries older than `ttl` are treated as a miss.
    fn get(&self, key: &str, ttl: Option<Duration>) -> Result<Option<serde_json::Value>>;
    fn put(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}
