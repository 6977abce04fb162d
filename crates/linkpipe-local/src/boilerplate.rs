//! Boilerplate region detection (navigation, footers, ads, metadata, comment widgets).
//!
//! Shared by the reducer, link extractor and document tree so all three agree on what
//! "not article content" means.

use html_scraper::ElementRef;

const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "iframe",
    "template", "svg",
];

const BOILERPLATE_ROLES: &[&str] = &[
    "navigation",
    "banner",
    "contentinfo",
    "complementary",
    "search",
];

// Matched against whole class/id tokens (split on non-alphanumerics), so "ad" does not
// hit "heading" and "nav" does not hit "canvas".
const BOILERPLATE_TOKENS: &[&str] = &[
    "nav",
    "navbar",
    "menu",
    "sidebar",
    "footer",
    "header",
    "banner",
    "cookie",
    "consent",
    "ad",
    "ads",
    "advert",
    "advertisement",
    "promo",
    "subscribe",
    "newsletter",
    "comments",
    "comment",
    "share",
    "social",
    "related",
    "breadcrumb",
    "breadcrumbs",
    "widget",
    "meta",
];

// CMS themes put layout and taxonomy classes on these ("has-sidebar", "tag-social-media");
// only tag and role rules apply to them.
const CONTENT_ROOT_TAGS: &[&str] = &["html", "body", "main", "article"];

fn class_or_id_lc(el: &ElementRef) -> String {
    let mut out = String::new();
    if let Some(c) = el.value().attr("class") {
        out.push_str(c);
        out.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        out.push_str(i);
    }
    out.to_ascii_lowercase()
}

/// True when this element itself starts a boilerplate region.
pub fn is_boilerplate_element(el: &ElementRef) -> bool {
    let tag = el.value().name();
    if BOILERPLATE_TAGS.contains(&tag) {
        return true;
    }
    if let Some(role) = el.value().attr("role") {
        let role = role.trim().to_ascii_lowercase();
        if BOILERPLATE_ROLES.contains(&role.as_str()) {
            return true;
        }
    }
    if CONTENT_ROOT_TAGS.contains(&tag) {
        return false;
    }
    let s = class_or_id_lc(el);
    if s.is_empty() {
        return false;
    }
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|tok| BOILERPLATE_TOKENS.contains(&tok))
}

/// True when the element or any ancestor element is boilerplate.
pub fn in_boilerplate(el: &ElementRef) -> bool {
    if is_boilerplate_element(el) {
        return true;
    }
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| is_boilerplate_element(&a))
}
