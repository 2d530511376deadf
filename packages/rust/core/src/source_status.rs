//! Terminal crawl status transitions for a source.
//!
//! Both transitions report success as a bool and never return errors: a
//! crawl's outcome is already decided when they run, and a status write
//! failure must not mask it.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use kbingest_shared::{CrawlStatus, MISSING_STATUS, Source, SourceRepository, SourceUpdate};

pub struct SourceStatusManager {
    repository: Arc<dyn SourceRepository>,
}

impl SourceStatusManager {
    pub fn new(repository: Arc<dyn SourceRepository>) -> Self {
        Self { repository }
    }

    /// Mark the source completed and verify the write by reading it back.
    #[instrument(skip(self))]
    pub async fn update_to_completed(&self, source_id: &str) -> bool {
        let Some(source) = self.load(source_id, CrawlStatus::Completed).await else {
            return false;
        };

        if let Err(e) = self
            .repository
            .update_source_info(status_update(&source, CrawlStatus::Completed))
            .await
        {
            error!(%source_id, error = %e, "failed to update crawl status to completed");
            return false;
        }

        match self.repository.get_source_by_id(source_id).await {
            Ok(Some(updated)) if updated.crawl_status() == Some(CrawlStatus::Completed) => {
                info!(%source_id, "crawl status set to completed and verified");
                true
            }
            Ok(Some(updated)) => {
                error!(
                    critical = true,
                    %source_id,
                    expected = CrawlStatus::Completed.as_str(),
                    actual = updated.crawl_status_label(),
                    "crawl status verification failed after update"
                );
                false
            }
            Ok(None) => {
                error!(
                    critical = true,
                    %source_id,
                    expected = CrawlStatus::Completed.as_str(),
                    actual = MISSING_STATUS,
                    "source disappeared after crawl status update"
                );
                false
            }
            Err(e) => {
                error!(
                    critical = true,
                    %source_id,
                    error = %e,
                    "could not re-read source to verify crawl status"
                );
                false
            }
        }
    }

    /// Mark the source failed. Best effort, no read-back.
    #[instrument(skip(self))]
    pub async fn update_to_failed(&self, source_id: &str) -> bool {
        if source_id.trim().is_empty() {
            warn!("no source id, skipping failed status update");
            return false;
        }

        let Some(source) = self.load(source_id, CrawlStatus::Failed).await else {
            return false;
        };

        match self
            .repository
            .update_source_info(status_update(&source, CrawlStatus::Failed))
            .await
        {
            Ok(()) => {
                info!(%source_id, "crawl status set to failed");
                true
            }
            Err(e) => {
                error!(%source_id, error = %e, "failed to update crawl status to failed");
                false
            }
        }
    }

    async fn load(&self, source_id: &str, target: CrawlStatus) -> Option<Source> {
        match self.repository.get_source_by_id(source_id).await {
            Ok(Some(source)) => Some(source),
            Ok(None) => {
                error!(%source_id, target = target.as_str(), "source not found, cannot update crawl status");
                None
            }
            Err(e) => {
                error!(%source_id, target = target.as_str(), error = %e, "failed to load source");
                None
            }
        }
    }
}

/// Status change that keeps the source's summary and word count.
fn status_update(source: &Source, status: CrawlStatus) -> SourceUpdate {
    SourceUpdate {
        source_id: source.id.clone(),
        summary: source.summary.clone(),
        word_count: source.total_word_count,
        crawl_status: status,
    }
}
