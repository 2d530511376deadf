//! Crawl ingestion orchestration for kbingest.
//!
//! This crate ties URL discovery, crawling, document storage, and code
//! example extraction into one end-to-end run ([`CrawlCoordinator::run`]),
//! with unified progress reporting and terminal status bookkeeping.

pub mod code_examples;
pub mod coordinator;
pub mod credentials;
pub mod document_processing;
pub mod heartbeat;
pub mod progress;
pub mod source_status;
pub mod url_handler;

#[cfg(test)]
mod testing;

pub use code_examples::{CodeExamplesJob, CodeExamplesOrchestrator};
pub use coordinator::{CrawlCoordinator, CrawlSummary, PipelineDeps};
pub use credentials::{ConfiguredCredentials, EMBEDDING_PROVIDER_ENV, LLM_PROVIDER_ENV};
pub use document_processing::{DocumentProcessingOrchestrator, ensure_persisted};
pub use heartbeat::{HEARTBEAT_MESSAGE, HeartbeatManager};
pub use progress::{
    ChannelSink, MappedSink, NullSink, ProgressMapper, StageTaggedSink, ThrottledSink,
    is_significant_update, map_progress, stage_range,
};
pub use source_status::SourceStatusManager;
pub use url_handler::{CrawlOutcome, UrlTypeHandler};
