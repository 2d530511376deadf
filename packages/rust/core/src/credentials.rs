//! Provider credentials from configuration and environment.

use async_trait::async_trait;

use kbingest_shared::{CredentialService, IngestError, ProviderKind, ProvidersConfig, Result};

pub const LLM_PROVIDER_ENV: &str = "KBINGEST_LLM_PROVIDER";
pub const EMBEDDING_PROVIDER_ENV: &str = "KBINGEST_EMBEDDING_PROVIDER";

/// [`CredentialService`] backed by `[providers]` config, overridable per
/// process through environment variables.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCredentials {
    llm: Option<String>,
    embedding: Option<String>,
}

impl ConfiguredCredentials {
    pub fn new(llm: Option<String>, embedding: Option<String>) -> Self {
        Self {
            llm: non_blank(llm),
            embedding: non_blank(embedding),
        }
    }

    /// Config values, with `KBINGEST_LLM_PROVIDER` / `KBINGEST_EMBEDDING_PROVIDER` taking precedence.
    pub fn from_config(providers: &ProvidersConfig) -> Self {
        Self::merge(
            providers,
            std::env::var(LLM_PROVIDER_ENV).ok(),
            std::env::var(EMBEDDING_PROVIDER_ENV).ok(),
        )
    }

    fn merge(providers: &ProvidersConfig, llm_env: Option<String>, embedding_env: Option<String>) -> Self {
        Self::new(
            non_blank(llm_env).or_else(|| providers.llm.clone()),
            non_blank(embedding_env).or_else(|| providers.embedding.clone()),
        )
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl CredentialService for ConfiguredCredentials {
    async fn get_active_provider(&self, kind: ProviderKind) -> Result<String> {
        let value = match kind {
            ProviderKind::Llm => &self.llm,
            ProviderKind::Embedding => &self.embedding,
        };
        value
            .clone()
            .ok_or_else(|| IngestError::Credential(format!("no active {kind} provider configured")))
    }
}
