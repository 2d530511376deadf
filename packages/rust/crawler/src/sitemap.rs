//! Sitemap parsing.

use std::sync::LazyLock;

use regex::Regex;

/// `<loc>` entries, optionally wrapped in CDATA.
static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<loc>\s*(?:<!\[CDATA\[)?\s*(.*?)\s*(?:\]\]>)?\s*</loc>")
        .expect("sitemap loc regex")
});

/// Extract page URLs from sitemap XML, in document order.
///
/// Entries that are not http(s) URLs are skipped. Duplicates are kept once.
pub(crate) fn parse_sitemap_xml(xml: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    LOC_RE
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
