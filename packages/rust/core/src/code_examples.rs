//! Optional code example extraction stage.
//!
//! Resolves which LLM and embedding providers the extractor should use, then
//! runs it. Extraction is best-effort: any failure other than cancellation is
//! reported and turned into zero examples so the crawl itself still completes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use kbingest_shared::{
    CancellationToken, CodeExampleExtractor, CodeExtractionJob, CrawlRequest, CredentialService,
    PageResult, ProgressEvent, ProgressSink, ProviderKind, Result, Stage, ensure_not_cancelled,
};

use crate::progress::{NullSink, StageTaggedSink, ThrottledSink};

/// Input of [`CodeExamplesOrchestrator::extract_code_examples`].
#[derive(Debug, Clone, Copy)]
pub struct CodeExamplesJob<'a> {
    pub request: &'a CrawlRequest,
    pub pages: &'a [PageResult],
    pub url_to_full_document: &'a HashMap<String, String>,
    pub source_id: &'a str,
    pub total_pages: usize,
}

pub struct CodeExamplesOrchestrator {
    credentials: Arc<dyn CredentialService>,
    extractor: Arc<dyn CodeExampleExtractor>,
    fallback_llm_provider: String,
}

impl CodeExamplesOrchestrator {
    pub fn new(
        credentials: Arc<dyn CredentialService>,
        extractor: Arc<dyn CodeExampleExtractor>,
        fallback_llm_provider: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            extractor,
            fallback_llm_provider: fallback_llm_provider.into(),
        }
    }

    /// Extract and store code examples. Returns how many were stored.
    #[instrument(skip_all, fields(source_id = %job.source_id, pages = job.pages.len()))]
    pub async fn extract_code_examples(
        &self,
        job: CodeExamplesJob<'_>,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<usize> {
        if !job.request.wants_code_examples() {
            debug!("code example extraction disabled for this request");
            return Ok(0);
        }
        ensure_not_cancelled(cancel)?;

        let llm_provider = self.resolve_llm_provider(job.request).await;
        let embedding_provider = self.resolve_embedding_provider().await;
        info!(
            llm_provider = %llm_provider,
            embedding_provider = embedding_provider.as_deref().unwrap_or("default"),
            "extracting code examples"
        );

        let caller: &dyn ProgressSink = progress.unwrap_or(&NullSink);
        let throttled = ThrottledSink::new(caller);
        let tagged = StageTaggedSink::new(&throttled, Stage::CodeExtraction, job.total_pages);

        let extraction = CodeExtractionJob {
            pages: job.pages,
            url_to_full_document: job.url_to_full_document,
            source_id: job.source_id,
            llm_provider: &llm_provider,
            embedding_provider: embedding_provider.as_deref(),
        };

        match self
            .extractor
            .extract_and_store_code_examples(extraction, &tagged, cancel)
            .await
        {
            Ok(count) => {
                info!(count, "code examples stored");
                Ok(count)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                error!(error = %e, "code example extraction failed");
                if let Some(sink) = progress {
                    let mut event =
                        ProgressEvent::new(Stage::CodeExtraction, 100, "Code extraction failed")
                            .with_error(e.to_string());
                    event.total_pages = Some(job.total_pages);
                    sink.send(event).await;
                }
                Ok(0)
            }
        }
    }

    async fn resolve_llm_provider(&self, request: &CrawlRequest) -> String {
        if let Some(provider) = request.explicit_provider() {
            return provider.to_string();
        }

        match self.credentials.get_active_provider(ProviderKind::Llm).await {
            Ok(provider) if !provider.trim().is_empty() => provider,
            Ok(_) => {
                warn!(fallback = %self.fallback_llm_provider, "active LLM provider is blank, using fallback");
                self.fallback_llm_provider.clone()
            }
            Err(e) => {
                warn!(error = %e, fallback = %self.fallback_llm_provider, "LLM provider lookup failed, using fallback");
                self.fallback_llm_provider.clone()
            }
        }
    }

    /// `None` lets the extractor use its default embedding provider.
    async fn resolve_embedding_provider(&self) -> Option<String> {
        match self
            .credentials
            .get_active_provider(ProviderKind::Embedding)
            .await
        {
            Ok(provider) if !provider.trim().is_empty() => Some(provider),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "embedding provider lookup failed, using storage default");
                None
            }
        }
    }
}
