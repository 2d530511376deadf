//! libSQL storage layer (local embedded database).
//!
//! The [`Storage`] struct wraps a libSQL database holding crawled sources,
//! their document chunks, and extracted code examples. It implements the
//! persistence-side collaborator traits of the ingestion pipeline:
//! [`SourceRepository`], [`DocumentStorage`] and [`CodeExampleExtractor`].

mod chunking;
mod migrations;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use kbingest_shared::{
    CancellationToken, CodeExampleExtractor, CodeExtractionJob, CrawlRequest, CrawlStatus,
    DocumentBatch, DocumentStorage, IngestError, ProgressEvent, ProgressSink, Result, Source,
    SourceRepository, SourceUpdate, Stage, StorageResult, ensure_not_cancelled, percent_of,
};

pub use chunking::{CodeBlock, extract_code_blocks, extractive_summary, smart_chunk, word_count};

/// Default maximum chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// Default minimum length of a code block worth storing.
pub const DEFAULT_MIN_CODE_BLOCK_LENGTH: usize = 250;

fn storage_err(e: impl std::fmt::Display) -> IngestError {
    IngestError::Storage(e.to_string())
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A source row with its stored content counts, for listing and status display.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: String,
    pub source_url: String,
    pub display_name: String,
    pub summary: Option<String>,
    pub total_word_count: u64,
    pub crawl_status: String,
    pub chunk_count: u64,
    pub code_example_count: u64,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    chunk_size: usize,
    min_code_block_length: usize,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_code_block_length: DEFAULT_MIN_CODE_BLOCK_LENGTH,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_min_code_block_length(mut self, length: usize) -> Self {
        self.min_code_block_length = length;
        self
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    IngestError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Source operations
    // -----------------------------------------------------------------------

    /// Register a new source for `request` with status `pending`. Returns its id.
    #[instrument(skip_all, fields(url = %request.source_url))]
    pub async fn insert_source(&self, request: &CrawlRequest) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let metadata = serde_json::json!({
            "crawl_status": CrawlStatus::Pending.as_str(),
            "knowledge_type": request.knowledge_type.as_str(),
            "tags": request.tags,
        });

        self.conn
            .execute(
                "INSERT INTO sources (id, source_url, display_name, summary, total_word_count,
                                      metadata_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, NULL, 0, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    request.source_url.as_str(),
                    request.display_name(),
                    metadata.to_string(),
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        debug!(source_id = %id, "source registered");
        Ok(id)
    }

    /// Overwrite `metadata.crawl_status`, leaving every other field alone.
    pub async fn set_crawl_status(&self, source_id: &str, status: CrawlStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE sources
                 SET metadata_json = json_set(metadata_json, '$.crawl_status', ?1),
                     updated_at = ?2
                 WHERE id = ?3",
                params![status.as_str(), now.as_str(), source_id],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(IngestError::Storage(format!("source not found: {source_id}")));
        }
        Ok(())
    }

    /// Get a source with its content counts.
    pub async fn get_source_record(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("{SOURCE_RECORD_SELECT} WHERE s.id = ?1"),
                params![source_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(source_record_from_row(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all sources, most recently updated first.
    pub async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("{SOURCE_RECORD_SELECT} ORDER BY s.updated_at DESC"),
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(source_record_from_row(&row)?);
        }
        Ok(results)
    }

    /// Record the summary, word count and crawl type produced by document storage.
    async fn record_source_content(
        &self,
        source_id: &str,
        summary: &str,
        word_count: u64,
        crawl_type: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE sources
                 SET summary = ?1,
                     total_word_count = ?2,
                     metadata_json = json_set(metadata_json, '$.crawl_type', ?3),
                     updated_at = ?4
                 WHERE id = ?5",
                params![summary, word_count as i64, crawl_type, now.as_str(), source_id],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            warn!(%source_id, "no source row to record content on");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Upsert a chunk (insert or update on conflict by `source_id + url + chunk_index`).
    async fn upsert_chunk(
        &self,
        source_id: &str,
        url: &str,
        chunk_index: usize,
        content: &str,
    ) -> Result<()> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO chunks (id, source_id, url, chunk_index, content, content_hash,
                                     word_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(source_id, url, chunk_index) DO UPDATE SET
                   content = excluded.content,
                   content_hash = excluded.content_hash,
                   word_count = excluded.word_count",
                params![
                    id.as_str(),
                    source_id,
                    url,
                    chunk_index as i64,
                    content,
                    sha256_hex(content),
                    word_count(content) as i64,
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Chunk contents of a source, ordered by URL and chunk index.
    pub async fn list_chunks(&self, source_id: &str) -> Result<Vec<(String, String)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, content FROM chunks WHERE source_id = ?1 ORDER BY url, chunk_index",
                params![source_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push((
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<String>(1).map_err(storage_err)?,
            ));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Code example operations
    // -----------------------------------------------------------------------

    /// Insert a code example. Returns false if the same code is already stored
    /// for the source.
    async fn insert_code_example(
        &self,
        source_id: &str,
        url: &str,
        block: &CodeBlock,
        llm_provider: &str,
        embedding_provider: Option<&str>,
    ) -> Result<bool> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "INSERT INTO code_examples (id, source_id, url, language, code, code_hash,
                                            llm_provider, embedding_provider, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(source_id, code_hash) DO NOTHING",
                params![
                    id.as_str(),
                    source_id,
                    url,
                    block.language.as_deref(),
                    block.code.as_str(),
                    sha256_hex(&block.code),
                    llm_provider,
                    embedding_provider,
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Code examples of a source as `(url, language, llm_provider, embedding_provider)`.
    pub async fn list_code_examples(
        &self,
        source_id: &str,
    ) -> Result<Vec<(String, Option<String>, String, Option<String>)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, language, llm_provider, embedding_provider
                 FROM code_examples WHERE source_id = ?1 ORDER BY created_at",
                params![source_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push((
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<String>(1).ok(),
                row.get::<String>(2).map_err(storage_err)?,
                row.get::<String>(3).ok(),
            ));
        }
        Ok(results)
    }
}

const SOURCE_RECORD_SELECT: &str = "
    SELECT s.id, s.source_url, s.display_name, s.summary, s.total_word_count,
           COALESCE(json_extract(s.metadata_json, '$.crawl_status'), 'MISSING'),
           (SELECT COUNT(*) FROM chunks c WHERE c.source_id = s.id),
           (SELECT COUNT(*) FROM code_examples e WHERE e.source_id = s.id),
           s.updated_at
    FROM sources s";

fn source_record_from_row(row: &libsql::Row) -> Result<SourceRecord> {
    Ok(SourceRecord {
        id: row.get::<String>(0).map_err(storage_err)?,
        source_url: row.get::<String>(1).map_err(storage_err)?,
        display_name: row.get::<String>(2).map_err(storage_err)?,
        summary: row.get::<String>(3).ok(),
        total_word_count: row.get::<i64>(4).map_err(storage_err)?.max(0) as u64,
        crawl_status: row.get::<String>(5).map_err(storage_err)?,
        chunk_count: row.get::<i64>(6).map_err(storage_err)?.max(0) as u64,
        code_example_count: row.get::<i64>(7).map_err(storage_err)?.max(0) as u64,
        updated_at: row.get::<String>(8).map_err(storage_err)?,
    })
}

// ---------------------------------------------------------------------------
// Pipeline collaborator impls
// ---------------------------------------------------------------------------

#[async_trait]
impl SourceRepository for Storage {
    async fn get_source_by_id(&self, source_id: &str) -> Result<Option<Source>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, summary, total_word_count, metadata_json FROM sources WHERE id = ?1",
                params![source_id],
            )
            .await
            .map_err(storage_err)?;

        let Some(row) = rows.next().await.map_err(storage_err)? else {
            return Ok(None);
        };

        let metadata_json = row.get::<String>(3).map_err(storage_err)?;
        let metadata = serde_json::from_str(&metadata_json).map_err(|e| {
            IngestError::Storage(format!("corrupt metadata for source {source_id}: {e}"))
        })?;

        Ok(Some(Source {
            id: row.get::<String>(0).map_err(storage_err)?,
            summary: row.get::<String>(1).ok(),
            total_word_count: row.get::<i64>(2).map_err(storage_err)?.max(0) as u64,
            metadata,
        }))
    }

    async fn update_source_info(&self, update: SourceUpdate) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE sources
                 SET summary = ?1,
                     total_word_count = ?2,
                     metadata_json = json_set(metadata_json, '$.crawl_status', ?3),
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    update.summary.as_deref(),
                    update.word_count as i64,
                    update.crawl_status.as_str(),
                    now.as_str(),
                    update.source_id.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(IngestError::Storage(format!(
                "source not found: {}",
                update.source_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStorage for Storage {
    #[instrument(skip_all, fields(source_id = %batch.source_id, crawl_type = %batch.crawl_type))]
    async fn process_and_store_documents(
        &self,
        batch: DocumentBatch<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<StorageResult> {
        let documents: Vec<_> = batch
            .pages
            .iter()
            .filter(|p| p.success && !p.content.trim().is_empty())
            .collect();
        let total = documents.len();

        let mut url_to_full_document = HashMap::with_capacity(total);
        let mut chunk_count = 0usize;
        let mut chunks_stored = 0usize;
        let mut total_words = 0u64;

        progress
            .send(
                ProgressEvent::new(
                    Stage::DocumentStorage,
                    0,
                    format!("Processing {total} documents"),
                )
                .with_pages(0, total),
            )
            .await;

        for (i, page) in documents.iter().enumerate() {
            ensure_not_cancelled(cancel)?;

            url_to_full_document.insert(page.url.clone(), page.content.clone());
            total_words += word_count(&page.content);

            let chunks = smart_chunk(&page.content, self.chunk_size);
            chunk_count += chunks.len();

            for (index, chunk) in chunks.iter().enumerate() {
                match self.upsert_chunk(batch.source_id, &page.url, index, chunk).await {
                    Ok(()) => chunks_stored += 1,
                    Err(e) => {
                        warn!(url = %page.url, chunk_index = index, error = %e, "failed to store chunk");
                    }
                }
            }

            let done = i + 1;
            progress
                .send(
                    ProgressEvent::new(
                        Stage::DocumentStorage,
                        percent_of(done, total),
                        format!("Stored {done}/{total} documents"),
                    )
                    .with_pages(done, total),
                )
                .await;
        }

        let summary = extractive_summary(
            batch.display_name,
            documents.iter().map(|p| p.content.as_str()),
        );
        self.record_source_content(
            batch.source_id,
            &summary,
            total_words,
            batch.crawl_type.as_str(),
        )
        .await?;

        info!(
            documents = total,
            chunk_count,
            chunks_stored,
            words = total_words,
            "documents stored"
        );

        Ok(StorageResult {
            chunks_stored,
            chunk_count,
            source_id: batch.source_id.to_string(),
            url_to_full_document,
        })
    }
}

#[async_trait]
impl CodeExampleExtractor for Storage {
    #[instrument(skip_all, fields(source_id = %job.source_id, llm_provider = %job.llm_provider))]
    async fn extract_and_store_code_examples(
        &self,
        job: CodeExtractionJob<'_>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let documents: Vec<(&str, &str)> = job
            .pages
            .iter()
            .filter(|p| p.success)
            .map(|p| {
                let full = job
                    .url_to_full_document
                    .get(&p.url)
                    .map_or(p.content.as_str(), String::as_str);
                (p.url.as_str(), full)
            })
            .collect();
        let total = documents.len();
        let mut stored = 0usize;

        for (i, (url, document)) in documents.iter().enumerate() {
            ensure_not_cancelled(cancel)?;

            for block in extract_code_blocks(document, self.min_code_block_length) {
                let inserted = self
                    .insert_code_example(
                        job.source_id,
                        url,
                        &block,
                        job.llm_provider,
                        job.embedding_provider,
                    )
                    .await
                    .map_err(|e| IngestError::Extraction(format!("{url}: {e}")))?;
                if inserted {
                    stored += 1;
                }
            }

            let done = i + 1;
            progress
                .send(
                    ProgressEvent::new(
                        Stage::CodeExtraction,
                        percent_of(done, total),
                        format!("Extracted code examples from {done}/{total} documents"),
                    )
                    .with_pages(done, total),
                )
                .await;
        }

        info!(documents = total, stored, "code examples stored");
        Ok(stored)
    }
}
