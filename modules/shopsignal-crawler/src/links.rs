//! Outbound-link extraction. Pure: no storage or network, safe to test
//! independently.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Matches anchor elements, capturing the href and the inner content.
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("valid regex")
});

/// Strips nested markup from anchor inner content.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// One outbound link discovered on a page: an absolute URL plus the anchor
/// text that pointed at it (None when the anchor had no visible text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    pub url: String,
    pub anchor: Option<String>,
}

/// Resolve a raw href against a base URL, returning an absolute http(s) URL
/// with fragment stripped.
fn resolve_href(raw: &str, base: Option<&url::Url>) -> Option<String> {
    let mut parsed = if raw.starts_with("http://") || raw.starts_with("https://") {
        url::Url::parse(raw).ok()?
    } else {
        base?.join(raw).ok()?
    };
    parsed.set_fragment(None);
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    Some(parsed.to_string())
}

fn anchor_text(inner: &str) -> Option<String> {
    let stripped = TAG_RE.replace_all(inner, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Extract a page's outbound links from raw HTML.
/// Discards fragment-only and `javascript:` targets, resolves relative and
/// protocol-relative hrefs against `base_url`, strips fragments, and
/// deduplicates by URL. When the same URL is linked more than once, the
/// last-seen anchor text wins.
pub fn extract_outbound_links(html: &str, base_url: &str) -> Vec<DiscoveredLink> {
    let base = url::Url::parse(base_url).ok();
    let mut order: Vec<String> = Vec::new();
    let mut anchors: HashMap<String, Option<String>> = HashMap::new();

    for cap in ANCHOR_RE.captures_iter(html) {
        let raw = cap[1].trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let lowered = raw.to_ascii_lowercase();
        if lowered.starts_with("javascript:") {
            continue;
        }
        let resolved = match resolve_href(raw, base.as_ref()) {
            Some(resolved) => resolved,
            None => continue,
        };
        let text = anchor_text(&cap[2]);
        match anchors.entry(resolved.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(text);
            }
            Entry::Vacant(entry) => {
                entry.insert(text);
                order.push(resolved);
            }
        }
    }

    order
        .into_iter()
        .map(|url| {
            let anchor = anchors.remove(&url).flatten();
            DiscoveredLink { url, anchor }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(links: &[DiscoveredLink]) -> Vec<&str> {
        links.iter().map(|l| l.url.as_str()).collect()
    }

    // --- Extraction and anchor text ---

    #[test]
    fn anchors_are_extracted_with_text() {
        let html = r#"<a href="https://example.com/shoes">Shoes</a>"#;
        let links = extract_outbound_links(html, "https://example.com");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/shoes");
        assert_eq!(links[0].anchor.as_deref(), Some("Shoes"));
    }

    #[test]
    fn nested_markup_is_stripped_from_anchor_text() {
        let html = r#"<a href="/sale"><span class="big">Summer</span> <b>Sale</b></a>"#;
        let links = extract_outbound_links(html, "https://example.com");
        assert_eq!(links[0].anchor.as_deref(), Some("Summer Sale"));
    }

    #[test]
    fn image_only_anchor_has_no_text() {
        let html = r#"<a href="/product/1"><img src="/p1.jpg"></a>"#;
        let links = extract_outbound_links(html, "https://example.com");
        assert_eq!(links[0].anchor, None);
    }

    #[test]
    fn multiline_anchor_is_matched() {
        let html = "<a\n  href=\"/categories\"\n  class=\"nav\">\n  All categories\n</a>";
        let links = extract_outbound_links(html, "https://example.com");
        assert_eq!(links[0].url, "https://example.com/categories");
        assert_eq!(links[0].anchor.as_deref(), Some("All categories"));
    }

    // --- Discarded targets ---

    #[test]
    fn fragment_only_href_is_discarded() {
        let html = r##"<a href="#reviews">Jump to reviews</a>"##;
        let links = extract_outbound_links(html, "https://example.com/product/1");
        assert!(links.is_empty());
    }

    #[test]
    fn javascript_href_is_discarded() {
        let html = r#"<a href="javascript:void(0)">Menu</a>
            <a href="JavaScript:openCart()">Cart</a>"#;
        let links = extract_outbound_links(html, "https://example.com");
        assert!(links.is_empty());
    }

    #[test]
    fn mailto_href_is_discarded_by_scheme_filter() {
        let html = r#"<a href="mailto:support@example.com">Contact</a>"#;
        let links = extract_outbound_links(html, "https://example.com");
        assert!(links.is_empty());
    }

    #[test]
    fn plain_text_urls_are_not_extracted() {
        let html = "Visit https://example.com/about for more";
        let links = extract_outbound_links(html, "https://example.com");
        assert!(links.is_empty());
    }

    #[test]
    fn img_src_is_not_extracted() {
        let html = r#"<img src="https://cdn.example.com/banner.jpg">"#;
        let links = extract_outbound_links(html, "https://example.com");
        assert!(links.is_empty());
    }

    // --- URL resolution ---

    #[test]
    fn relative_href_resolves_against_base() {
        let html = r#"<a href="/collections/new">New</a>"#;
        let links = extract_outbound_links(html, "https://example.com/home");
        assert_eq!(urls(&links), vec!["https://example.com/collections/new"]);
    }

    #[test]
    fn path_relative_href_resolves_against_base_path() {
        let html = r#"<a href="size-guide">Size guide</a>"#;
        let links = extract_outbound_links(html, "https://example.com/products/");
        assert_eq!(urls(&links), vec!["https://example.com/products/size-guide"]);
    }

    #[test]
    fn protocol_relative_href_inherits_base_scheme() {
        let html = r#"<a href="//shop.example.com/cart">Cart</a>"#;
        let links = extract_outbound_links(html, "https://example.com");
        assert_eq!(urls(&links), vec!["https://shop.example.com/cart"]);
    }

    #[test]
    fn fragment_is_stripped_from_resolved_url() {
        let html = r#"<a href="https://example.com/p/1#reviews">Reviews</a>"#;
        let links = extract_outbound_links(html, "https://example.com");
        assert_eq!(urls(&links), vec!["https://example.com/p/1"]);
    }

    #[test]
    fn malformed_base_url_does_not_crash() {
        let html = r#"<a href="/about">About</a>
            <a href="https://example.com/direct">Direct</a>"#;
        let links = extract_outbound_links(html, "not a url");
        // Relative hrefs cannot resolve; absolute ones still come through.
        assert_eq!(urls(&links), vec!["https://example.com/direct"]);
    }

    // --- Deduplication ---

    #[test]
    fn duplicate_urls_collapse_with_last_anchor_winning() {
        let html = r#"
            <a href="/product/1">First anchor</a>
            <a href="/product/1#top">Second anchor</a>
        "#;
        let links = extract_outbound_links(html, "https://example.com");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].anchor.as_deref(), Some("Second anchor"));
    }

    #[test]
    fn empty_html_returns_empty() {
        assert!(extract_outbound_links("", "https://example.com").is_empty());
    }

    // --- Realistic page ---

    #[test]
    fn storefront_navigation_page() {
        let html = r##"
            <nav>
                <a href="/collections/shoes">Shoes</a>
                <a href="/collections/bags">Bags</a>
                <a href="#search">Search</a>
                <a href="javascript:toggleMenu()">Menu</a>
            </nav>
            <main>
                <a href="https://example.com/product/42"><img src="/42.jpg"></a>
                <a href="https://instagram.com/example_shop">Instagram</a>
            </main>
        "##;
        let links = extract_outbound_links(html, "https://example.com");
        assert_eq!(
            urls(&links),
            vec![
                "https://example.com/collections/shoes",
                "https://example.com/collections/bags",
                "https://example.com/product/42",
                "https://instagram.com/example_shop",
            ]
        );
    }
}
