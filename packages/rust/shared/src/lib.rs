//! Shared types, error model, configuration, and collaborator traits for kbingest.
//!
//! This crate is the foundation depended on by all other kbingest crates.
//! It provides:
//! - [`IngestError`], the unified error type
//! - Domain types ([`CrawlRequest`], [`PageResult`], [`StorageResult`], [`Source`], [`ProgressEvent`])
//! - Configuration ([`AppConfig`], [`IngestSettings`], config loading)
//! - Collaborator traits ([`CrawlPrimitives`], [`DocumentStorage`], [`SourceRepository`], ...)

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CodeExtractionConfig, DefaultsConfig, HeartbeatConfig, IngestSettings,
    ProvidersConfig, StorageConfig, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from,
};
pub use error::{IngestError, Result};
pub use traits::{
    CodeExampleExtractor, CodeExtractionJob, CrawlPrimitives, CredentialService, DocumentBatch,
    DocumentStorage, ProgressSink, SourceRepository, ensure_not_cancelled,
};
pub use types::{
    CrawlRequest, CrawlStatus, CrawlType, DEFAULT_MAX_DEPTH, KnowledgeType, LinkRef,
    MISSING_STATUS, PageResult, ProgressEvent, ProviderKind, Source, SourceUpdate, Stage,
    StorageResult, percent_of,
};

pub use tokio_util::sync::CancellationToken;
