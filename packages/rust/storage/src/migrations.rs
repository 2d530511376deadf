//! SQL migration definitions for the kbingest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: sources, chunks, code_examples",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Crawled knowledge sources. Crawl status lives in metadata_json.
CREATE TABLE IF NOT EXISTS sources (
    id               TEXT PRIMARY KEY,
    source_url       TEXT NOT NULL,
    display_name     TEXT NOT NULL,
    summary          TEXT,
    total_word_count INTEGER NOT NULL DEFAULT 0,
    metadata_json    TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

-- Document chunks
CREATE TABLE IF NOT EXISTS chunks (
    id           TEXT PRIMARY KEY,
    source_id    TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    url          TEXT NOT NULL,
    chunk_index  INTEGER NOT NULL,
    content      TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    word_count   INTEGER NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(source_id, url, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id);

-- Code examples extracted from stored documents
CREATE TABLE IF NOT EXISTS code_examples (
    id                 TEXT PRIMARY KEY,
    source_id          TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    url                TEXT NOT NULL,
    language           TEXT,
    code               TEXT NOT NULL,
    code_hash          TEXT NOT NULL,
    llm_provider       TEXT NOT NULL,
    embedding_provider TEXT,
    created_at         TEXT NOT NULL,
    UNIQUE(source_id, code_hash)
);

CREATE INDEX IF NOT EXISTS idx_code_examples_source_id ON code_examples(source_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
