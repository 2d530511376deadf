//! Link extraction for link-collection documents.
//!
//! Recognises two shapes, in document order:
//! - Markdown links: `[Name](url)` / `- [Name](url): notes` (llms.txt style)
//! - Bare or autolinked URLs: `https://…`, `<https://…>`

use std::collections::HashSet;
use std::sync::LazyLock;

use kbingest_shared::LinkRef;
use regex::Regex;
use url::Url;

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `[text](target)` with an optional `"title"`. The target may hold
/// one level of balanced parentheses.
static MARKDOWN_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[([^\]]*)\]\(\s*<?((?:[^()\s>]|\([^()\s]*\))+)>?(?:\s+"[^"]*")?\s*\)"#)
        .expect("markdown link regex")
});

/// Matches a bare http(s) URL.
static BARE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'()\[\]]+"#).expect("bare url regex")
});

/// Characters that commonly trail a URL in prose without being part of it.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract `(url, text)` pairs from a text/markdown document.
///
/// Relative markdown targets resolve against `base_url`. Only http(s)
/// results are kept, and a URL seen twice keeps its first occurrence.
pub fn extract_links(content: &str, base_url: &str) -> Vec<LinkRef> {
    let base = Url::parse(base_url).ok();
    let mut found: Vec<(usize, LinkRef)> = Vec::new();
    let mut markdown_spans: Vec<(usize, usize)> = Vec::new();

    for caps in MARKDOWN_LINK_RE.captures_iter(content) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        markdown_spans.push((whole.start(), whole.end()));

        let Some(url) = resolve(target.as_str(), base.as_ref()) else {
            continue;
        };
        let text = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        found.push((whole.start(), LinkRef::new(url, text)));
    }

    for m in BARE_URL_RE.find_iter(content) {
        let inside_markdown = markdown_spans
            .iter()
            .any(|&(start, end)| m.start() >= start && m.start() < end);
        if inside_markdown {
            continue;
        }

        let raw = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        if let Some(url) = resolve(raw, None) {
            found.push((m.start(), LinkRef::new(url, "")));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, link)| link)
        .filter(|link| seen.insert(link.url.clone()))
        .collect()
}

/// Turn a raw link target into an absolute http(s) URL string.
fn resolve(target: &str, base: Option<&Url>) -> Option<String> {
    let target = target.trim();
    if target.is_empty()
        || target.starts_with('#')
        || target.starts_with("mailto:")
        || target.starts_with("javascript:")
    {
        return None;
    }

    let parsed = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(target).ok()?,
        Err(_) => return None,
    };

    match parsed.scheme() {
        "http" | "https" => Some(parsed.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://docs.example.com/llms.txt";

    #[test]
    fn extracts_llms_txt_entries_with_text() {
        let content = "# Example Docs\n\n> Summary line.\n\n## Getting Started\n\n\
            - [Installation](https://docs.example.com/install): How to install\n\
            - [Quickstart](https://docs.example.com/quickstart)\n";
        let links = extract_links(content, BASE);
        assert_eq!(
            links,
            vec![
                LinkRef::new("https://docs.example.com/install", "Installation"),
                LinkRef::new("https://docs.example.com/quickstart", "Quickstart"),
            ]
        );
    }

    #[test]
    fn resolves_relative_targets_against_document() {
        let links = extract_links("- [API](/reference/api)\n- [Guide](guide.md)", BASE);
        assert_eq!(links[0].url, "https://docs.example.com/reference/api");
        assert_eq!(links[1].url, "https://docs.example.com/guide.md");
    }

    #[test]
    fn keeps_balanced_parentheses_in_target() {
        let content = "- [Rust](https://en.wikipedia.org/wiki/Rust_(programming_language))\n\
            - [Next](https://docs.example.com/next)";
        let links = extract_links(content, BASE);
        assert_eq!(
            links,
            vec![
                LinkRef::new(
                    "https://en.wikipedia.org/wiki/Rust_(programming_language)",
                    "Rust"
                ),
                LinkRef::new("https://docs.example.com/next", "Next"),
            ]
        );
    }

    #[test]
    fn picks_up_bare_and_autolinked_urls_in_order() {
        let content = "See https://a.example.org/x. Also <https://b.example.org/y>\n\
            and [C](https://c.example.org/z)";
        let urls: Vec<_> = extract_links(content, BASE)
            .into_iter()
            .map(|l| l.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://a.example.org/x",
                "https://b.example.org/y",
                "https://c.example.org/z",
            ]
        );
    }

    #[test]
    fn markdown_target_is_not_counted_twice() {
        let links = extract_links("[Docs](https://example.com/docs)", BASE);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text, "Docs");
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let content = "[First](https://example.com/a)\n[Second](https://example.com/a)";
        let links = extract_links(content, BASE);
        assert_eq!(links, vec![LinkRef::new("https://example.com/a", "First")]);
    }

    #[test]
    fn ignores_non_http_targets() {
        let content = "[Mail](mailto:team@example.com) [Top](#top) \
            [Run](javascript:void(0)) [FTP](ftp://example.com/file)";
        assert!(extract_links(content, BASE).is_empty());
    }

    #[test]
    fn invalid_base_skips_relative_links() {
        let links = extract_links("[Rel](/x) [Abs](https://example.com/y)", "not a url");
        assert_eq!(links, vec![LinkRef::new("https://example.com/y", "Abs")]);
    }
}
