//! URL classification and link discovery for crawl dispatch.
//!
//! Before crawling, the URL type handler decides which strategy a URL needs
//! (text file, sitemap, or recursive crawl). Text files that turn out to be
//! link collections (llms.txt-style indexes) have their links extracted and
//! filtered here before being batch-crawled.
//!
//! The two fuzzy judgements, "is this a link collection" and "does this link
//! point back at the document", are traits so callers can swap heuristics.

mod filters;
mod parser;

use url::Url;

pub use filters::{filter_binary_links, filter_self_links};
pub use parser::extract_links;

/// Extensions served as plain text/markdown documents.
const TEXT_EXTENSIONS: &[&str] = &[".txt", ".md", ".mdx", ".markdown"];

/// Extensions of files that are never worth crawling as text.
const BINARY_EXTENSIONS: &[&str] = &[
    // archives
    ".zip", ".tar", ".gz", ".tgz", ".bz2", ".xz", ".rar", ".7z",
    // executables and packages
    ".exe", ".msi", ".dmg", ".pkg", ".deb", ".rpm", ".apk", ".appimage", ".jar",
    // images
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".ico", ".svg", ".webp", ".tiff",
    // audio and video
    ".mp3", ".wav", ".flac", ".ogg", ".mp4", ".avi", ".mov", ".mkv", ".webm", ".wmv",
    // documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
    // fonts
    ".woff", ".woff2", ".ttf", ".otf", ".eot",
    // native code and disk images
    ".dll", ".so", ".dylib", ".bin", ".iso", ".img",
];

/// File names that are link collections by convention.
const LINK_COLLECTION_NAMES: &[&str] = &[
    "llms.txt",
    "links.txt",
    "resources.txt",
    "references.txt",
    "urls.txt",
];

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Crawl strategy family a URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// `.txt` / `.md` style document fetched as a single file.
    TextFile,
    /// XML sitemap listing pages to batch-crawl.
    Sitemap,
    /// Anything else: recursive HTML crawl.
    Webpage,
}

impl UrlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextFile => "text file",
            Self::Sitemap => "sitemap",
            Self::Webpage => "webpage",
        }
    }
}

/// Classify a URL by its path. First match wins: text file, sitemap, webpage.
pub fn classify_url(url: &str) -> UrlKind {
    let path = lowercase_path(url);

    if TEXT_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        UrlKind::TextFile
    } else if path.ends_with(".xml") && path.contains("sitemap") {
        UrlKind::Sitemap
    } else {
        UrlKind::Webpage
    }
}

/// Whether the URL points at a known binary file type.
pub fn is_binary_url(url: &str) -> bool {
    let path = lowercase_path(url);
    BINARY_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Lowercased URL path without query or fragment.
fn lowercase_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    }
}

// ---------------------------------------------------------------------------
// Link-collection detection
// ---------------------------------------------------------------------------

/// Decides whether a fetched text document is an index of links to crawl.
pub trait LinkCollectionDetector: Send + Sync {
    fn is_link_collection(&self, url: &str, content: &str) -> bool;
}

/// Default detector: conventional file names, or markdown whose body is mostly links.
#[derive(Debug, Clone)]
pub struct LlmsTxtDetector {
    /// Fraction of body lines that must carry a link.
    pub min_link_ratio: f64,
    /// Minimum number of links for the ratio rule to apply.
    pub min_links: usize,
}

impl Default for LlmsTxtDetector {
    fn default() -> Self {
        Self {
            min_link_ratio: 0.5,
            min_links: 2,
        }
    }
}

impl LinkCollectionDetector for LlmsTxtDetector {
    fn is_link_collection(&self, url: &str, content: &str) -> bool {
        let path = lowercase_path(url);
        let file_name = path.rsplit('/').next().unwrap_or_default();
        if LINK_COLLECTION_NAMES.contains(&file_name) {
            return true;
        }

        // Headings, blockquotes and blank lines are framing, not body.
        let body: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('>'))
            .collect();
        if body.is_empty() {
            return false;
        }

        let linked = body
            .iter()
            .filter(|l| !extract_links(l, url).is_empty())
            .count();
        linked >= self.min_links && linked as f64 / body.len() as f64 >= self.min_link_ratio
    }
}

// ---------------------------------------------------------------------------
// Self-link detection
// ---------------------------------------------------------------------------

/// Decides whether a link refers to the same resource as the base document.
pub trait SelfLinkCheck: Send + Sync {
    fn is_same_resource(&self, link: &str, base: &str) -> bool;
}

/// Default check: equal after ignoring http/https, `www.`, host case,
/// trailing slash and fragment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedUrlEquivalence;

impl NormalizedUrlEquivalence {
    fn key(url: &str) -> String {
        match Url::parse(url) {
            Ok(parsed) => {
                let host = parsed.host_str().unwrap_or_default();
                let host = host.strip_prefix("www.").unwrap_or(host);
                let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
                let path = parsed.path().trim_end_matches('/');
                let query = parsed.query().map(|q| format!("?{q}")).unwrap_or_default();
                format!("{host}{port}{path}{query}")
            }
            Err(_) => url
                .split('#')
                .next()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

impl SelfLinkCheck for NormalizedUrlEquivalence {
    fn is_same_resource(&self, link: &str, base: &str) -> bool {
        Self::key(link) == Self::key(base)
    }
}
