//! End-to-end crawl run: crawl → store → code examples → finalize.
//!
//! The coordinator owns one run's progress plumbing. Every stage reports
//! stage-local progress through a [`MappedSink`], so the caller sees one
//! monotonic 0–100 value. While a stage is busy the heartbeat driver keeps
//! the caller informed that the run is alive.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use kbingest_discovery::classify_url;
use kbingest_shared::{
    CancellationToken, CodeExampleExtractor, CrawlPrimitives, CrawlRequest, CrawlType,
    CredentialService, DocumentBatch, DocumentStorage, IngestError, IngestSettings, ProgressEvent,
    ProgressSink, Result, SourceRepository, Stage, ensure_not_cancelled,
};

use crate::code_examples::{CodeExamplesJob, CodeExamplesOrchestrator};
use crate::document_processing::DocumentProcessingOrchestrator;
use crate::heartbeat::HeartbeatManager;
use crate::progress::{MappedSink, ProgressMapper, ThrottledSink};
use crate::source_status::SourceStatusManager;
use crate::url_handler::UrlTypeHandler;

/// How often a busy stage checks whether a heartbeat is due.
const HEARTBEAT_POLL: Duration = Duration::from_secs(1);

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub source_id: String,
    pub crawl_type: CrawlType,
    pub pages_crawled: usize,
    pub pages_failed: usize,
    pub chunks_stored: usize,
    pub code_examples: usize,
    /// Whether the `completed` status was read back after writing it.
    pub status_verified: bool,
}

/// Collaborators a coordinator is built from.
pub struct PipelineDeps {
    pub crawler: Arc<dyn CrawlPrimitives>,
    pub documents: Arc<dyn DocumentStorage>,
    pub code_extractor: Arc<dyn CodeExampleExtractor>,
    pub repository: Arc<dyn SourceRepository>,
    pub credentials: Arc<dyn CredentialService>,
}

pub struct CrawlCoordinator {
    url_handler: UrlTypeHandler,
    documents: DocumentProcessingOrchestrator,
    code_examples: CodeExamplesOrchestrator,
    status: SourceStatusManager,
    heartbeat_interval: Duration,
}

impl CrawlCoordinator {
    pub fn new(deps: PipelineDeps, settings: &IngestSettings) -> Self {
        Self::from_parts(
            UrlTypeHandler::new(deps.crawler, settings.max_concurrent),
            DocumentProcessingOrchestrator::new(deps.documents),
            CodeExamplesOrchestrator::new(
                deps.credentials,
                deps.code_extractor,
                settings.fallback_llm_provider.clone(),
            ),
            SourceStatusManager::new(deps.repository),
            settings.heartbeat_interval,
        )
    }

    pub fn from_parts(
        url_handler: UrlTypeHandler,
        documents: DocumentProcessingOrchestrator,
        code_examples: CodeExamplesOrchestrator,
        status: SourceStatusManager,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            url_handler,
            documents,
            code_examples,
            status,
            heartbeat_interval,
        }
    }

    /// Run one crawl for an already registered source.
    ///
    /// Errors from the crawl, storage or code stages mark the source failed
    /// and are returned. A completion that cannot be verified is still `Ok`
    /// with `status_verified: false`.
    #[instrument(skip_all, fields(url = %request.source_url, source_id = %source_id))]
    pub async fn run(
        &self,
        request: &CrawlRequest,
        source_id: &str,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<CrawlSummary> {
        let mapper = ProgressMapper::new();
        let heartbeat = HeartbeatManager::new(self.heartbeat_interval, Some(progress.clone()));
        let mapped = MappedSink::new(progress.as_ref(), &mapper, &heartbeat);
        let ctx = RunContext {
            mapper: &mapper,
            heartbeat: &heartbeat,
            sink: &mapped,
        };

        let mut summary = match self.run_stages(request, source_id, &ctx, cancel).await {
            Ok(summary) => summary,
            Err(e) => {
                let marked_failed = self.status.update_to_failed(source_id).await;
                let (stage, message) = if e.is_cancelled() {
                    warn!(marked_failed, "crawl cancelled");
                    (Stage::Cancelled, "Crawl cancelled")
                } else {
                    error!(error = %e, marked_failed, "crawl failed");
                    (Stage::Failed, "Crawl failed")
                };
                progress
                    .send(ProgressEvent::new(stage, mapper.current(), message).with_error(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        mapped
            .send(ProgressEvent::new(Stage::Finalization, 0, "Finalizing crawl"))
            .await;
        summary.status_verified = self.status.update_to_completed(source_id).await;

        if summary.status_verified {
            mapped
                .send(
                    ProgressEvent::new(Stage::Completed, 100, "Crawl completed")
                        .with_pages(summary.pages_crawled, summary.pages_crawled + summary.pages_failed),
                )
                .await;
            info!(
                crawl_type = %summary.crawl_type,
                pages = summary.pages_crawled,
                chunks = summary.chunks_stored,
                code_examples = summary.code_examples,
                "crawl completed"
            );
        } else {
            progress
                .send(
                    ProgressEvent::new(
                        Stage::Failed,
                        mapper.current(),
                        "Crawl finished but its completed status could not be verified",
                    )
                    .with_error("crawl status verification failed"),
                )
                .await;
            warn!("crawl finished with unverified completion status");
        }

        Ok(summary)
    }

    async fn run_stages(
        &self,
        request: &CrawlRequest,
        source_id: &str,
        ctx: &RunContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<CrawlSummary> {
        let url = request.source_url.as_str();

        // --- Stage 1: analyze ---
        ensure_not_cancelled(cancel)?;
        ctx.sink
            .send(ProgressEvent::new(Stage::Starting, 0, format!("Starting crawl of {url}")))
            .await;
        let kind = classify_url(url);
        ctx.sink
            .send(ProgressEvent::new(
                Stage::Analyzing,
                100,
                format!("Detected {} URL", kind.as_str()),
            ))
            .await;

        // --- Stage 2: crawl ---
        ensure_not_cancelled(cancel)?;
        let crawl_sink = ThrottledSink::new(ctx.sink);
        let outcome = ctx
            .with_heartbeat(
                Stage::Crawling,
                self.url_handler.crawl_by_type(url, request, &crawl_sink, cancel),
            )
            .await?;

        let pages_crawled = outcome.pages.iter().filter(|p| p.success).count();
        let pages_failed = outcome.pages.len() - pages_crawled;
        info!(
            crawl_type = %outcome.crawl_type,
            pages_crawled,
            pages_failed,
            "crawl stage finished"
        );
        if pages_crawled == 0 {
            return Err(IngestError::validation("no content was crawled"));
        }

        // --- Stage 3: store documents ---
        ensure_not_cancelled(cancel)?;
        ctx.sink
            .send(
                ProgressEvent::new(
                    Stage::Processing,
                    100,
                    format!("Processing {pages_crawled} crawled pages"),
                )
                .with_pages(0, pages_crawled),
            )
            .await;

        let display_name = request.display_name();
        let batch = DocumentBatch {
            pages: &outcome.pages,
            request,
            crawl_type: outcome.crawl_type,
            source_id,
            source_url: url,
            display_name: &display_name,
        };
        let stored = ctx
            .with_heartbeat(
                Stage::DocumentStorage,
                self.documents.process_and_store(batch, ctx.sink, cancel),
            )
            .await?;

        // --- Stage 4: code examples ---
        ensure_not_cancelled(cancel)?;
        let job = CodeExamplesJob {
            request,
            pages: &outcome.pages,
            url_to_full_document: &stored.url_to_full_document,
            source_id,
            total_pages: pages_crawled,
        };
        let code_examples = ctx
            .with_heartbeat(
                Stage::CodeExtraction,
                self.code_examples
                    .extract_code_examples(job, cancel, Some(ctx.sink as &dyn ProgressSink)),
            )
            .await?;

        Ok(CrawlSummary {
            source_id: source_id.to_string(),
            crawl_type: outcome.crawl_type,
            pages_crawled,
            pages_failed,
            chunks_stored: stored.chunks_stored,
            code_examples,
            status_verified: false,
        })
    }
}

/// Per-run progress state shared by the stages.
struct RunContext<'a> {
    mapper: &'a ProgressMapper,
    heartbeat: &'a HeartbeatManager,
    sink: &'a MappedSink<'a>,
}

impl RunContext<'_> {
    /// Drive `stage` to completion, offering a heartbeat once per poll tick.
    async fn with_heartbeat<T>(&self, stage: Stage, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::pin!(fut);
        let mut ticker = tokio::time::interval(HEARTBEAT_POLL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut fut => return result,
                _ = ticker.tick() => {
                    self.heartbeat.send_if_needed(stage, self.mapper.current()).await;
                }
            }
        }
    }
}
