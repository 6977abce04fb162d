use crate::boilerplate::in_boilerplate;
use crate::document::rendered_text;
use linkpipe_core::ExistingLink;
use regex::RegexSet;
use std::collections::BTreeSet;
use std::sync::OnceLock;

// Any relative href resolves against this; only the path is ever read back.
const PLACEHOLDER_BASE: &str = "https://placeholder.invalid/";

/// Which links count as "same site".
#[derive(Debug, Clone, Default)]
pub struct LinkScope {
    /// The site's own hostname (e.g. `example.com`); `www.` is ignored on both sides.
    pub site_host: Option<String>,
    /// Normalized paths known to belong to the site (sitemap/inventory).
    pub known_paths: BTreeSet<String>,
    /// 0 means the default cap.
    pub max_links: usize,
}

impl LinkScope {
    pub fn new(site_host: Option<&str>) -> Self {
        Self {
            site_host: site_host.map(|h| h.to_string()),
            ..Self::default()
        }
    }

    pub fn with_known_urls<'a>(mut self, urls: impl IntoIterator<Item = &'a str>) -> Self {
        self.known_paths
            .extend(urls.into_iter().map(normalize_path));
        self
    }
}

fn exclusion_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)/author/",
            r"(?i)/category/",
            r"(?i)/tag/",
            r"(?i)/search(/|$|\?)",
            r"(?i)[?&]s=",
            r"(?i)/(login|signin|sign-in|register|wp-login\.php|wp-admin)(/|$|\?)",
            r"(?i)^\s*mailto:",
            r"(?i)^\s*tel:",
            r"(?i)^\s*(javascript|vbscript|data):",
            r"^\s*#",
        ])
        .unwrap_or_else(|_| RegexSet::empty())
    })
}

/// True for hrefs that never count as editorial internal links.
pub fn is_excluded_href(href: &str) -> bool {
    exclusion_patterns().is_match(href)
}

fn host_key(h: &str) -> String {
    let h = h.trim().trim_end_matches('.').to_ascii_lowercase();
    h.strip_prefix("www.").map(|s| s.to_string()).unwrap_or(h)
}

fn is_relative(href: &str) -> bool {
    let h = href.trim();
    !h.starts_with("//") && url::Url::parse(h).is_err()
}

fn parse_href(href: &str) -> Option<url::Url> {
    let h = href.trim();
    if let Ok(u) = url::Url::parse(h) {
        return Some(u);
    }
    url::Url::parse(PLACEHOLDER_BASE).ok()?.join(h).ok()
}

/// Lowercased path without trailing slash (`/Page/` == `/page`); the root stays `/`.
pub fn normalize_path(href: &str) -> String {
    let path = parse_href(href)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|| href.split(['?', '#']).next().unwrap_or("").to_string());
    let lc = path.to_lowercase();
    let trimmed = lc.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Dedup key for link targets: the normalized path for relative or same-site URLs,
/// `host + path` for anything else.
pub fn normalize_target(url: &str, site_host: Option<&str>) -> String {
    let path = normalize_path(url);
    if is_relative(url) {
        return path;
    }
    match parse_href(url).and_then(|u| u.host_str().map(host_key)) {
        Some(h) if site_host.map(host_key).as_deref() == Some(h.as_str()) => path,
        Some(h) => format!("{h}{path}"),
        None => path,
    }
}

fn is_internal(href: &str, normalized: &str, scope: &LinkScope) -> bool {
    if is_relative(href) {
        return true;
    }
    if let Some(site) = scope.site_host.as_deref() {
        let host = parse_href(href).and_then(|u| u.host_str().map(host_key));
        if host.as_deref() == Some(host_key(site).as_str()) {
            return true;
        }
    }
    scope.known_paths.contains(normalized)
}

/// Enumerate existing same-site links, in document order.
///
/// - Skips anchors inside boilerplate regions and anchors with empty text or href.
/// - Drops excluded hrefs (author/category/tag/search/login/mailto/tel/script/fragment).
/// - Returns at most `scope.max_links` (default 500).
pub fn extract_existing_links(html: &str, scope: &LinkScope) -> Vec<ExistingLink> {
    let max_links = if scope.max_links == 0 {
        500
    } else {
        scope.max_links
    };

    let doc = html_scraper::Html::parse_document(html);
    let sel = match html_scraper::Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut out: Vec<ExistingLink> = Vec::new();
    for el in doc.select(&sel) {
        if out.len() >= max_links {
            break;
        }
        let href = match el.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if href.is_empty() || is_excluded_href(href) {
            continue;
        }
        if in_boilerplate(&el) {
            continue;
        }
        let anchor_text = rendered_text(&el);
        if anchor_text.is_empty() {
            continue;
        }
        let normalized_path = normalize_path(href);
        if !is_internal(href, &normalized_path, scope) {
            continue;
        }
        out.push(ExistingLink {
            anchor_text,
            href: href.to_string(),
            normalized_path,
        });
    }

    out
}

/// True when `markup` already holds an `<a>` pointing at `target`, whether or not the
/// target counts as internal.
pub fn links_to(markup: &str, target: &str, site_host: Option<&str>) -> bool {
    let want = normalize_target(target, site_host);
    let frag = html_scraper::Html::parse_fragment(markup);
    let Ok(sel) = html_scraper::Selector::parse("a[href]") else {
        return false;
    };
    frag.select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .any(|href| normalize_target(href.trim(), site_host) == want)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
    <html><body>
      <nav><a href="/home">Home</a></nav>
      <article>
        <p>See <a href="/Pricing/">our pricing</a> and
           <a href="https://www.example.com/features">the features</a>.</p>
        <p><a href="https://other.org/x">elsewhere</a>
           <a href="/author/jane">Jane</a>
           <a href="mailto:hi@example.com">mail us</a>
           <a href="#top">top</a>
           <a href="/blank"> </a>
           <a href="https://partner.net/Guide/">partner guide</a></p>
      </article>
      <footer><a href="/privacy">Privacy</a></footer>
    </body></html>"##;

    #[test]
    fn extracts_same_site_links_in_document_order() {
        let scope = LinkScope::new(Some("example.com"));
        let links = extract_existing_links(PAGE, &scope);
        let got: Vec<(&str, &str)> = links
            .iter()
            .map(|l| (l.anchor_text.as_str(), l.normalized_path.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![("our pricing", "/pricing"), ("the features", "/features")]
        );
    }

    #[test]
    fn known_paths_make_foreign_hosts_internal() {
        let scope = LinkScope::new(None).with_known_urls(["https://partner.net/guide"]);
        let links = extract_existing_links(PAGE, &scope);
        assert!(links
            .iter()
            .any(|l| l.anchor_text == "partner guide" && l.normalized_path == "/guide"));
        // Without a site host, absolute same-site links are not assumed internal.
        assert!(!links.iter().any(|l| l.anchor_text == "the features"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let scope = LinkScope::new(Some("example.com"));
        assert_eq!(
            extract_existing_links(PAGE, &scope),
            extract_existing_links(PAGE, &scope)
        );
    }

    #[test]
    fn respects_max_links() {
        let scope = LinkScope {
            max_links: 1,
            ..LinkScope::new(Some("example.com"))
        };
        assert_eq!(extract_existing_links(PAGE, &scope).len(), 1);
    }

    #[test]
    fn normalize_path_folds_case_and_trailing_slash() {
        assert_eq!(normalize_path("/Page/"), normalize_path("/page"));
        assert_eq!(normalize_path("https://example.com/A/b/?q=1#x"), "/a/b");
        assert_eq!(normalize_path("https://example.com"), "/");
        assert_eq!(normalize_path("docs/intro"), "/docs/intro");
    }

    #[test]
    fn normalize_target_keeps_foreign_hosts_distinct() {
        let site = Some("example.com");
        assert_eq!(normalize_target("/pricing", site), "/pricing");
        assert_eq!(
            normalize_target("https://www.example.com/Pricing/", site),
            "/pricing"
        );
        assert_eq!(
            normalize_target("https://other.org/pricing", site),
            "other.org/pricing"
        );
    }

    #[test]
    fn links_to_matches_any_host_by_normalized_target() {
        let markup = r#"Our <a href="https://example.com/Pricing/">pricing plans</a> rock."#;
        assert!(links_to(markup, "https://example.com/pricing", None));
        assert!(links_to(markup, "/pricing", Some("www.example.com")));
        assert!(!links_to(markup, "/pricing", None));
        assert!(!links_to(markup, "https://other.org/pricing", None));
    }

    #[test]
    fn exclusion_patterns_cover_non_editorial_hrefs() {
        for h in [
            "/author/x",
            "/category/news/",
            "/tag/rust",
            "/search?q=a",
            "/?s=term",
            "/wp-login.php",
            "mailto:a@b.c",
            "tel:123",
            "javascript:void(0)",
            "#section",
        ] {
            assert!(is_excluded_href(h), "{h}");
        }
        assert!(!is_excluded_href("/pricing"));
        assert!(!is_excluded_href("/research-notes"));
    }
}
