//! In-memory collaborators for orchestration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use kbingest_shared::{
    CancellationToken, CodeExampleExtractor, CodeExtractionJob, CrawlPrimitives, CrawlStatus,
    CredentialService, DocumentBatch, DocumentStorage, IngestError, PageResult, ProgressEvent,
    ProgressSink, ProviderKind, Result, Source, SourceRepository, SourceUpdate, Stage,
    StorageResult, ensure_not_cancelled, percent_of,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn send(&self, event: ProgressEvent) {
        lock(&self.events).push(event);
    }
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlCall {
    TextFile,
    Sitemap,
    Batch,
    Recursive,
}

/// Serves registered pages; every other URL comes back as a failed page.
#[derive(Default)]
pub struct FakeCrawler {
    pages: HashMap<String, String>,
    sitemaps: HashMap<String, Vec<String>>,
    delay: Option<Duration>,
    cancel_after_fetch: Option<CancellationToken>,
    calls: Mutex<Vec<CrawlCall>>,
    batches: Mutex<Vec<Vec<String>>>,
    titles: Mutex<Vec<Option<String>>>,
    concurrency: Mutex<Vec<usize>>,
    depths: Mutex<Vec<u32>>,
}

impl FakeCrawler {
    pub fn with_page(mut self, url: &str, content: &str) -> Self {
        self.pages.insert(url.to_string(), content.to_string());
        self
    }

    pub fn with_sitemap(mut self, url: &str, urls: Vec<String>) -> Self {
        self.sitemaps.insert(url.to_string(), urls);
        self
    }

    /// Sleep this long inside every crawl call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancel `token` once a crawl call has fetched its pages.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_after_fetch = Some(token);
        self
    }

    pub fn calls(&self) -> Vec<CrawlCall> {
        lock(&self.calls).clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        lock(&self.batches).clone()
    }

    /// Titles of pages returned by batch crawls.
    pub fn titles_seen(&self) -> Vec<Option<String>> {
        lock(&self.titles).clone()
    }

    pub fn concurrency_seen(&self) -> Vec<usize> {
        lock(&self.concurrency).clone()
    }

    pub fn depths_seen(&self) -> Vec<u32> {
        lock(&self.depths).clone()
    }

    async fn enter(&self, call: CrawlCall, cancel: &CancellationToken) -> Result<()> {
        ensure_not_cancelled(cancel)?;
        lock(&self.calls).push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn page(&self, url: &str) -> PageResult {
        match self.pages.get(url) {
            Some(content) => PageResult::ok(url, content.as_str()),
            None => PageResult::failed(url, "HTTP 404"),
        }
    }

    async fn fetch_all(&self, urls: &[String], progress: &dyn ProgressSink) -> Vec<PageResult> {
        let mut pages = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            pages.push(self.page(url));
            progress
                .send(
                    ProgressEvent::new(Stage::Crawling, percent_of(i + 1, urls.len()), "crawling")
                        .with_pages(i + 1, urls.len()),
                )
                .await;
        }
        if let Some(token) = &self.cancel_after_fetch {
            token.cancel();
        }
        pages
    }
}

#[async_trait]
impl CrawlPrimitives for FakeCrawler {
    async fn crawl_text_file(
        &self,
        url: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>> {
        self.enter(CrawlCall::TextFile, cancel).await?;
        Ok(self.fetch_all(&[url.to_string()], progress).await)
    }

    async fn parse_sitemap(&self, url: &str) -> Result<Vec<String>> {
        lock(&self.calls).push(CrawlCall::Sitemap);
        self.sitemaps
            .get(url)
            .cloned()
            .ok_or_else(|| IngestError::Network(format!("no sitemap at {url}")))
    }

    async fn crawl_batch(
        &self,
        urls: &[String],
        max_concurrent: usize,
        progress: &dyn ProgressSink,
        link_text_fallbacks: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>> {
        self.enter(CrawlCall::Batch, cancel).await?;
        lock(&self.batches).push(urls.to_vec());
        lock(&self.concurrency).push(max_concurrent);

        let mut pages = self.fetch_all(urls, progress).await;
        for page in pages.iter_mut().filter(|p| p.success && p.title.is_none()) {
            page.title = link_text_fallbacks.get(&page.url).cloned();
        }
        lock(&self.titles).extend(pages.iter().map(|p| p.title.clone()));
        Ok(pages)
    }

    async fn crawl_recursive(
        &self,
        start_urls: &[String],
        max_depth: u32,
        max_concurrent: usize,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>> {
        self.enter(CrawlCall::Recursive, cancel).await?;
        lock(&self.concurrency).push(max_concurrent);
        lock(&self.depths).push(max_depth);
        Ok(self.fetch_all(start_urls, progress).await)
    }
}

// ---------------------------------------------------------------------------
// Document storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// One chunk per successful page, all stored.
    Normal,
    /// Chunks produced, none stored.
    SilentFailure,
    Error,
}

pub struct FakeDocumentStorage {
    mode: StoreMode,
    batches: Mutex<Vec<Vec<String>>>,
}

impl FakeDocumentStorage {
    pub fn new(mode: StoreMode) -> Self {
        Self {
            mode,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// URLs of every batch passed in.
    pub fn batches(&self) -> Vec<Vec<String>> {
        lock(&self.batches).clone()
    }
}

#[async_trait]
impl DocumentStorage for FakeDocumentStorage {
    async fn process_and_store_documents(
        &self,
        batch: DocumentBatch<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<StorageResult> {
        ensure_not_cancelled(cancel)?;
        lock(&self.batches).push(batch.pages.iter().map(|p| p.url.clone()).collect());
        if self.mode == StoreMode::Error {
            return Err(IngestError::Storage("database is locked".into()));
        }

        let ok: Vec<&PageResult> = batch.pages.iter().filter(|p| p.success).collect();
        progress
            .send(ProgressEvent::new(Stage::DocumentStorage, 0, "storing"))
            .await;
        for i in 1..=ok.len() {
            progress
                .send(
                    ProgressEvent::new(Stage::DocumentStorage, percent_of(i, ok.len()), "storing")
                        .with_pages(i, ok.len()),
                )
                .await;
        }

        let chunks_stored = match self.mode {
            StoreMode::SilentFailure => 0,
            _ => ok.len(),
        };
        Ok(StorageResult {
            chunks_stored,
            chunk_count: ok.len(),
            source_id: batch.source_id.to_string(),
            url_to_full_document: ok
                .iter()
                .map(|p| (p.url.clone(), p.content.clone()))
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Code extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Count(usize),
    Fail,
    Cancelled,
}

/// Owned copy of what the extractor was asked to do.
#[derive(Debug, Clone)]
pub struct RecordedJob {
    pub llm_provider: String,
    pub embedding_provider: Option<String>,
    /// Successful page URLs, in crawl order.
    pub urls: Vec<String>,
    /// Full documents for `urls`.
    pub documents: Vec<String>,
}

pub struct FakeExtractor {
    mode: ExtractMode,
    jobs: Mutex<Vec<RecordedJob>>,
}

impl FakeExtractor {
    pub fn new(mode: ExtractMode) -> Self {
        Self {
            mode,
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn jobs(&self) -> Vec<RecordedJob> {
        lock(&self.jobs).clone()
    }
}

#[async_trait]
impl CodeExampleExtractor for FakeExtractor {
    async fn extract_and_store_code_examples(
        &self,
        job: CodeExtractionJob<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        ensure_not_cancelled(cancel)?;
        let urls: Vec<String> = job
            .pages
            .iter()
            .filter(|p| p.success)
            .map(|p| p.url.clone())
            .collect();
        let documents = urls
            .iter()
            .filter_map(|u| job.url_to_full_document.get(u).cloned())
            .collect();
        lock(&self.jobs).push(RecordedJob {
            llm_provider: job.llm_provider.to_string(),
            embedding_provider: job.embedding_provider.map(str::to_string),
            urls,
            documents,
        });

        match self.mode {
            ExtractMode::Count(n) => {
                for p in 0..=100u8 {
                    progress
                        .send(ProgressEvent::new(Stage::CodeExtraction, p, "extracting"))
                        .await;
                }
                Ok(n)
            }
            ExtractMode::Fail => Err(IngestError::Extraction("model unavailable".into())),
            ExtractMode::Cancelled => Err(IngestError::Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

pub struct FakeCredentials {
    llm: Option<String>,
    embedding: Option<String>,
    lookups: AtomicUsize,
}

impl FakeCredentials {
    pub fn new(llm: Option<&str>, embedding: Option<&str>) -> Self {
        Self {
            llm: llm.map(str::to_string),
            embedding: embedding.map(str::to_string),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialService for FakeCredentials {
    async fn get_active_provider(&self, kind: ProviderKind) -> Result<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let value = match kind {
            ProviderKind::Llm => &self.llm,
            ProviderKind::Embedding => &self.embedding,
        };
        value
            .clone()
            .ok_or_else(|| IngestError::Credential(format!("{kind} provider not set")))
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepoMode {
    #[default]
    Normal,
    ReadFails,
    UpdateFails,
    /// Accepts updates without applying the status.
    IgnoresUpdates,
    /// Applying an update loses `metadata.crawl_status`.
    DropsStatusKey,
    /// The row is gone after the first update.
    VanishesAfterUpdate,
}

#[derive(Default)]
pub struct FakeRepository {
    mode: RepoMode,
    sources: Mutex<HashMap<String, Source>>,
    updates: Mutex<Vec<SourceUpdate>>,
    reads: AtomicUsize,
}

impl FakeRepository {
    pub fn with_source(id: &str, status: CrawlStatus) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("crawl_status".into(), serde_json::json!(status.as_str()));
        let source = Source {
            id: id.to_string(),
            summary: Some(format!("summary of {id}")),
            total_word_count: 120,
            metadata,
        };
        let repo = Self::default();
        lock(&repo.sources).insert(id.to_string(), source);
        repo
    }

    pub fn mode(mut self, mode: RepoMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn updates(&self) -> Vec<SourceUpdate> {
        lock(&self.updates).clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn status_of(&self, id: &str) -> Option<CrawlStatus> {
        lock(&self.sources).get(id).and_then(Source::crawl_status)
    }
}

#[async_trait]
impl SourceRepository for FakeRepository {
    async fn get_source_by_id(&self, source_id: &str) -> Result<Option<Source>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.mode == RepoMode::ReadFails {
            return Err(IngestError::Storage("connection reset".into()));
        }
        Ok(lock(&self.sources).get(source_id).cloned())
    }

    async fn update_source_info(&self, update: SourceUpdate) -> Result<()> {
        if self.mode == RepoMode::UpdateFails {
            return Err(IngestError::Storage("disk full".into()));
        }
        let mut sources = lock(&self.sources);
        match self.mode {
            RepoMode::IgnoresUpdates => {}
            RepoMode::VanishesAfterUpdate => {
                sources.remove(&update.source_id);
            }
            _ => {
                if let Some(source) = sources.get_mut(&update.source_id) {
                    source.summary = update.summary.clone();
                    source.total_word_count = update.word_count;
                    if self.mode == RepoMode::DropsStatusKey {
                        source.metadata.remove("crawl_status");
                    } else {
                        source.metadata.insert(
                            "crawl_status".into(),
                            serde_json::json!(update.crawl_status.as_str()),
                        );
                    }
                }
            }
        }
        drop(sources);
        lock(&self.updates).push(update);
        Ok(())
    }
}
