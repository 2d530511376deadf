//! Chunk + store stage with the persistence invariant.

use std::sync::Arc;

use tracing::{error, info, instrument};

use kbingest_shared::{
    CancellationToken, DocumentBatch, DocumentStorage, IngestError, ProgressSink, Result,
    StorageResult,
};

use crate::progress::ThrottledSink;

/// Fail if storage processed chunks but persisted none of them.
///
/// Zero chunks overall is a legitimate (empty) result and passes.
pub fn ensure_persisted(result: &StorageResult, url: &str) -> Result<()> {
    if result.is_silent_failure() {
        error!(
            %url,
            chunk_count = result.chunk_count,
            chunks_stored = result.chunks_stored,
            "chunks were processed but none were stored"
        );
        return Err(IngestError::StorageInvariant {
            url: url.to_string(),
            chunk_count: result.chunk_count,
            chunks_stored: result.chunks_stored,
        });
    }
    Ok(())
}

pub struct DocumentProcessingOrchestrator {
    storage: Arc<dyn DocumentStorage>,
}

impl DocumentProcessingOrchestrator {
    pub fn new(storage: Arc<dyn DocumentStorage>) -> Self {
        Self { storage }
    }

    #[instrument(skip_all, fields(source_id = %batch.source_id, pages = batch.pages.len()))]
    pub async fn process_and_store(
        &self,
        batch: DocumentBatch<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<StorageResult> {
        let throttled = ThrottledSink::new(progress);
        let result = self
            .storage
            .process_and_store_documents(batch, &throttled, cancel)
            .await?;

        ensure_persisted(&result, batch.source_url)?;

        info!(
            chunk_count = result.chunk_count,
            chunks_stored = result.chunks_stored,
            documents = result.url_to_full_document.len(),
            "document storage finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;
    use crate::testing::{FakeDocumentStorage, RecordingSink, StoreMode};
    use kbingest_shared::{CrawlRequest, CrawlType, PageResult, Stage};

    fn result(chunk_count: usize, chunks_stored: usize) -> StorageResult {
        StorageResult {
            chunks_stored,
            chunk_count,
            source_id: "src".into(),
            url_to_full_document: HashMap::new(),
        }
    }

    proptest! {
        #[test]
        fn invariant_holds_iff_something_stored(chunk_count in 0usize..50, chunks_stored in 0usize..50) {
            let outcome = ensure_persisted(&result(chunk_count, chunks_stored), "https://ex.com");
            prop_assert_eq!(outcome.is_err(), chunk_count > 0 && chunks_stored == 0);
        }
    }

    #[test]
    fn invariant_error_carries_counts() {
        let err = ensure_persisted(&result(7, 0), "https://ex.com/docs").unwrap_err();
        assert!(matches!(
            err,
            IngestError::StorageInvariant { ref url, chunk_count: 7, chunks_stored: 0 }
                if url == "https://ex.com/docs"
        ));
    }

    async fn run(mode: StoreMode, pages: &[PageResult]) -> (Result<StorageResult>, RecordingSink) {
        let request = CrawlRequest::new("https://ex.com/docs");
        let orchestrator = DocumentProcessingOrchestrator::new(Arc::new(FakeDocumentStorage::new(mode)));
        let sink = RecordingSink::default();
        let result = orchestrator
            .process_and_store(
                DocumentBatch {
                    pages,
                    request: &request,
                    crawl_type: CrawlType::Normal,
                    source_id: "src",
                    source_url: &request.source_url,
                    display_name: "Example",
                },
                &sink,
                &CancellationToken::new(),
            )
            .await;
        (result, sink)
    }

    #[tokio::test]
    async fn stores_and_throttles_progress() {
        let pages: Vec<PageResult> = (0..40)
            .map(|i| PageResult::ok(format!("https://ex.com/{i}"), "body"))
            .collect();
        let (result, sink) = run(StoreMode::Normal, &pages).await;

        let result = result.unwrap();
        assert_eq!(result.chunks_stored, 40);
        let events = sink.events();
        // 41 raw events (0 plus one per page) collapse to steps of at least 5
        assert!(events.len() < 25);
        assert!(events.iter().all(|e| e.stage == Stage::DocumentStorage));
        assert_eq!(events.last().map(|e| e.progress), Some(100));
    }

    #[tokio::test]
    async fn silent_storage_failure_is_an_error() {
        let pages = vec![PageResult::ok("https://ex.com/a", "body")];
        let (result, _) = run(StoreMode::SilentFailure, &pages).await;
        assert!(matches!(result, Err(IngestError::StorageInvariant { .. })));
    }

    #[tokio::test]
    async fn empty_result_is_fine() {
        let pages = vec![PageResult::failed("https://ex.com/a", "HTTP 500")];
        let (result, _) = run(StoreMode::Normal, &pages).await;
        let result = result.unwrap();
        assert_eq!(result.chunk_count, 0);
        assert_eq!(result.chunks_stored, 0);
    }

    #[tokio::test]
    async fn storage_errors_propagate() {
        let pages = vec![PageResult::ok("https://ex.com/a", "body")];
        let (result, _) = run(StoreMode::Error, &pages).await;
        assert!(matches!(result, Err(IngestError::Storage(_))));
    }
}
