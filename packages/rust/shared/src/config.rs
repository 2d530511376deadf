//! Application configuration for kbingest.
//!
//! User config lives at `~/.kbingest/kbingest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::types::{DEFAULT_MAX_DEPTH, KnowledgeType};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbingest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbingest";

// ---------------------------------------------------------------------------
// Config structs (matching kbingest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Liveness signalling.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// LLM / embedding provider selection.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Chunk storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Code example extraction.
    #[serde(default)]
    pub code_extraction: CodeExtractionConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the libSQL database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Default recursive crawl depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Default concurrent fetches.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Knowledge type for new sources.
    #[serde(default)]
    pub knowledge_type: KnowledgeType,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_depth: default_max_depth(),
            max_concurrent: default_max_concurrent(),
            knowledge_type: KnowledgeType::default(),
        }
    }
}

fn default_db_path() -> String {
    "~/.kbingest/kbingest.db".into()
}
fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}
fn default_max_concurrent() -> usize {
    5
}

/// `[heartbeat]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Minimum seconds between heartbeat events. `0` sends one on every check.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

/// `[providers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Active LLM provider. Unset means the credential lookup fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,

    /// Active embedding provider. Unset means "storage default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,

    /// LLM provider used when the lookup fails.
    #[serde(default = "default_fallback_llm")]
    pub fallback_llm: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            llm: None,
            embedding: None,
            fallback_llm: default_fallback_llm(),
        }
    }
}

fn default_fallback_llm() -> String {
    "openai".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    5000
}

/// `[code_extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExtractionConfig {
    /// Fenced blocks shorter than this many characters are ignored.
    #[serde(default = "default_min_block_length")]
    pub min_block_length: usize,
}

impl Default for CodeExtractionConfig {
    fn default() -> Self {
        Self {
            min_block_length: default_min_block_length(),
        }
    }
}

fn default_min_block_length() -> usize {
    250
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime ingestion settings, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Resolved database path (`~` expanded).
    pub db_path: PathBuf,
    pub max_depth: u32,
    pub max_concurrent: usize,
    pub heartbeat_interval: Duration,
    pub fallback_llm_provider: String,
    pub chunk_size: usize,
    pub min_code_block_length: usize,
}

impl From<&AppConfig> for IngestSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            db_path: expand_home(&config.defaults.db_path),
            max_depth: config.defaults.max_depth,
            max_concurrent: config.defaults.max_concurrent.max(1),
            heartbeat_interval: Duration::from_secs(config.heartbeat.interval_secs),
            fallback_llm_provider: config.providers.fallback_llm.clone(),
            chunk_size: config.storage.chunk_size.max(1),
            min_code_block_length: config.code_extraction.min_block_length,
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbingest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| IngestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbingest/kbingest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| IngestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| IngestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| IngestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| IngestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
