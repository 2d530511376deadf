//! Collaborator interfaces for the ingestion pipeline.
//!
//! These are infrastructure seams only: the orchestrators in `kbingest-core`
//! depend on them, concrete crates (`kbingest-crawler`, `kbingest-storage`)
//! implement them, and tests substitute fakes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, Result};
use crate::types::{
    CrawlRequest, CrawlType, PageResult, ProgressEvent, ProviderKind, Source, SourceUpdate,
    StorageResult,
};

/// Return [`IngestError::Cancelled`] if the token has been cancelled.
pub fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Receiver of progress updates.
///
/// Sending never fails; an implementation that cannot deliver an event logs
/// and drops it.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn send(&self, event: ProgressEvent);
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Read/write access to persisted sources.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn get_source_by_id(&self, source_id: &str) -> Result<Option<Source>>;

    /// Source update service: rewrite summary, word count and crawl status.
    async fn update_source_info(&self, update: SourceUpdate) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Resolves which provider is active for a capability. May fail.
#[async_trait]
pub trait CredentialService: Send + Sync {
    async fn get_active_provider(&self, kind: ProviderKind) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Crawling
// ---------------------------------------------------------------------------

/// Fetch primitives the URL type handler dispatches to.
///
/// Page failures come back as `success: false` entries. `Err` is reserved
/// for cancellation and unusable input.
#[async_trait]
pub trait CrawlPrimitives: Send + Sync {
    /// Fetch one text/markdown file.
    async fn crawl_text_file(
        &self,
        url: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>>;

    /// Parse a sitemap into a flat URL list.
    async fn parse_sitemap(&self, url: &str) -> Result<Vec<String>>;

    /// Fetch a list of URLs with bounded concurrency. `link_text_fallbacks`
    /// maps a URL to a title used when the page has none.
    async fn crawl_batch(
        &self,
        urls: &[String],
        max_concurrent: usize,
        progress: &dyn ProgressSink,
        link_text_fallbacks: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>>;

    /// Depth-bounded recursive crawl from the start URLs.
    async fn crawl_recursive(
        &self,
        start_urls: &[String],
        max_depth: u32,
        max_concurrent: usize,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Input of the chunk + store stage.
#[derive(Debug, Clone, Copy)]
pub struct DocumentBatch<'a> {
    pub pages: &'a [PageResult],
    pub request: &'a CrawlRequest,
    pub crawl_type: CrawlType,
    pub source_id: &'a str,
    pub source_url: &'a str,
    pub display_name: &'a str,
}

/// Chunks crawled pages and persists them.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn process_and_store_documents(
        &self,
        batch: DocumentBatch<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<StorageResult>;
}

/// Input of the code example stage.
#[derive(Debug, Clone, Copy)]
pub struct CodeExtractionJob<'a> {
    pub pages: &'a [PageResult],
    pub url_to_full_document: &'a HashMap<String, String>,
    pub source_id: &'a str,
    pub llm_provider: &'a str,
    /// `None` means "use the storage default".
    pub embedding_provider: Option<&'a str>,
}

/// Extracts code examples from stored documents and persists them.
#[async_trait]
pub trait CodeExampleExtractor: Send + Sync {
    /// Returns the number of examples stored.
    async fn extract_and_store_code_examples(
        &self,
        job: CodeExtractionJob<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<usize>;
}
