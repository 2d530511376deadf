//! Core domain types for one crawl ingestion run.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Recursive crawl depth used when a request does not set one.
pub const DEFAULT_MAX_DEPTH: u32 = 1;

/// Status string reported when a source has no `crawl_status` in its metadata.
pub const MISSING_STATUS: &str = "MISSING";

// ---------------------------------------------------------------------------
// CrawlRequest
// ---------------------------------------------------------------------------

/// Kind of knowledge a source holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    #[default]
    Technical,
    Business,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Business => "business",
        }
    }
}

impl std::str::FromStr for KnowledgeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "technical" => Ok(Self::Technical),
            "business" => Ok(Self::Business),
            other => Err(format!("unknown knowledge type: {other}")),
        }
    }
}

/// A request to crawl one knowledge source. Immutable for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRequest {
    /// URL the crawl starts from.
    pub source_url: String,
    /// Maximum recursive crawl depth (defaults to [`DEFAULT_MAX_DEPTH`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    /// Upper bound on concurrent fetches (defaults to the configured value).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    /// Whether to extract code examples. Absent means yes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_code_examples: Option<bool>,
    /// Explicit LLM provider, bypassing the credential lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub knowledge_type: KnowledgeType,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Human-readable name (defaults to the URL host).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl CrawlRequest {
    /// A request with every optional field left at its default.
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            max_depth: None,
            max_concurrent: None,
            extract_code_examples: None,
            provider: None,
            knowledge_type: KnowledgeType::default(),
            tags: Vec::new(),
            display_name: None,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH)
    }

    /// Concurrency for this run, falling back to `default` and never below 1.
    pub fn max_concurrent_or(&self, default: usize) -> usize {
        self.max_concurrent.unwrap_or(default).max(1)
    }

    pub fn wants_code_examples(&self) -> bool {
        self.extract_code_examples.unwrap_or(true)
    }

    /// Explicit provider, if set and non-blank.
    pub fn explicit_provider(&self) -> Option<&str> {
        self.provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Display name, falling back to the URL host, then the raw URL.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.trim().to_string();
        }
        Url::parse(&self.source_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.source_url.clone())
    }
}

// ---------------------------------------------------------------------------
// Crawl output
// ---------------------------------------------------------------------------

/// One crawled page. Fetch failures are represented, not thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    /// Page text (markdown for HTML pages, raw text for text files).
    pub content: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Failure reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageResult {
    pub fn ok(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            success: true,
            title: None,
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: String::new(),
            success: false,
            title: None,
            error: Some(error.into()),
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }
}

/// A link extracted from a link-collection document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkRef {
    pub url: String,
    /// Anchor text; empty for bare URLs.
    pub text: String,
}

impl LinkRef {
    pub fn new(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: text.into(),
        }
    }
}

/// Strategy that produced a set of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlType {
    TextFile,
    LinkCollectionWithCrawledLinks,
    Sitemap,
    Normal,
}

impl CrawlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextFile => "text_file",
            Self::LinkCollectionWithCrawledLinks => "link_collection_with_crawled_links",
            Self::Sitemap => "sitemap",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for CrawlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the chunk + store stage.
///
/// Invariant: `chunk_count == 0 || chunks_stored > 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageResult {
    pub chunks_stored: usize,
    pub chunk_count: usize,
    pub source_id: String,
    /// Full document text keyed by page URL, for code extraction.
    #[serde(default)]
    pub url_to_full_document: HashMap<String, String>,
}

impl StorageResult {
    /// Chunks were produced but none reached the database.
    pub fn is_silent_failure(&self) -> bool {
        self.chunk_count > 0 && self.chunks_stored == 0
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Crawl status stored under `metadata.crawl_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CrawlStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown crawl status: {other}")),
        }
    }
}

/// A knowledge source as persisted by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub total_word_count: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Source {
    /// Raw `metadata.crawl_status`, or [`MISSING_STATUS`] when absent or not a string.
    pub fn crawl_status_label(&self) -> &str {
        self.metadata
            .get("crawl_status")
            .and_then(|v| v.as_str())
            .unwrap_or(MISSING_STATUS)
    }

    pub fn crawl_status(&self) -> Option<CrawlStatus> {
        self.crawl_status_label().parse().ok()
    }
}

/// Argument of the source update service.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUpdate {
    pub source_id: String,
    pub summary: Option<String>,
    pub word_count: u64,
    pub crawl_status: CrawlStatus,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Stage of a run, used to tag progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Starting,
    Analyzing,
    Crawling,
    Processing,
    DocumentStorage,
    CodeExtraction,
    Finalization,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Analyzing => "analyzing",
            Self::Crawling => "crawling",
            Self::Processing => "processing",
            Self::DocumentStorage => "document_storage",
            Self::CodeExtraction => "code_extraction",
            Self::Finalization => "finalization",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ephemeral progress update. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Percent, 0-100. Stage-local or overall depending on where the event is observed.
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_pages: Option<usize>,
    /// Synthetic liveness signal rather than real progress.
    #[serde(default)]
    pub heartbeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress: progress.min(100),
            message: message.into(),
            total_pages: None,
            processed_pages: None,
            heartbeat: false,
            error: None,
        }
    }

    pub fn with_pages(mut self, processed: usize, total: usize) -> Self {
        self.processed_pages = Some(processed);
        self.total_pages = Some(total);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Stage-local percent for `done` out of `total` items.
pub fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Which provider a credential lookup resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Llm,
    Embedding,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Embedding => "embedding",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
