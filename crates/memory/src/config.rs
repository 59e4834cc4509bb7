use std::path::PathBuf;

use crate::error::{Error, Result};

/// Which embedding provider to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    OpenAi,
    Cohere,
    Ollama,
    HuggingFace,
    LiteLlm,
}

impl std::str::FromStr for EmbeddingProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "cohere" => Ok(Self::Cohere),
            "ollama" => Ok(Self::Ollama),
            "huggingface" => Ok(Self::HuggingFace),
            "litellm" => Ok(Self::LiteLlm),
            other => Err(Error::InvalidArgument(format!(
                "unknown embedding provider {other:?} (expected openai, cohere, ollama, huggingface or litellm)"
            ))),
        }
    }
}

/// Configuration for the memory subsystem.
///
/// Populated from the environment by [`MemoryConfig::from_env`]; tests build
/// it directly with struct update syntax off [`Default`].
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Root of the markdown tree (`MEMORY_FILES_PATH`).
    pub files_path: PathBuf,
    /// Whether the Postgres index is enabled. `false` switches the service
    /// into file-only mode: search returns `StorageUnavailable`, sync is a
    /// no-op.
    pub use_database: bool,
    /// Postgres connection string (`DATABASE_URL`).
    pub database_url: Option<String>,
    /// Which embedding provider to use.
    pub embedding_provider: EmbeddingProviderKind,
    /// Provider API key, where the provider needs one.
    pub embedding_api_key: Option<String>,
    /// Provider model name override.
    pub embedding_model: Option<String>,
    /// Provider base URL override (ollama, litellm, self-hosted endpoints).
    pub embedding_base_url: Option<String>,
    /// Expected embedding dimension. When set, a provider reporting a
    /// different dimension is rejected at construction time.
    pub embedding_dimension: Option<usize>,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap carried between consecutive chunks of the same section.
    pub chunk_overlap: usize,
    /// Default result limit for search.
    pub search_limit: usize,
    /// Reciprocal rank fusion constant.
    pub rrf_k: u32,
    /// Number of background sync workers.
    pub sync_workers: usize,
    /// Capacity of the reconcile queue.
    pub sync_queue_capacity: usize,
    /// Interval between periodic reconcile sweeps.
    pub sweep_interval: std::time::Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            files_path: PathBuf::from("memory-files"),
            use_database: true,
            database_url: None,
            embedding_provider: EmbeddingProviderKind::OpenAi,
            embedding_api_key: None,
            embedding_model: None,
            embedding_base_url: None,
            embedding_dimension: None,
            chunk_size: 800,
            chunk_overlap: 200,
            search_limit: 20,
            rrf_k: 60,
            sync_workers: 4,
            sync_queue_capacity: 1024,
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            Error::InvalidArgument(format!("{name}={raw:?} is not a valid value"))
        }),
    }
}

impl MemoryConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(path) = env_var("MEMORY_FILES_PATH") {
            cfg.files_path = PathBuf::from(path);
        }
        if let Some(raw) = env_var("USE_DATABASE") {
            cfg.use_database = match raw.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "USE_DATABASE={other:?} is not a boolean"
                    )));
                },
            };
        }
        cfg.database_url = env_var("DATABASE_URL");
        if cfg.use_database && cfg.database_url.is_none() {
            return Err(Error::InvalidArgument(
                "USE_DATABASE=true requires DATABASE_URL".into(),
            ));
        }

        if let Some(raw) = env_var("EMBEDDING_PROVIDER") {
            cfg.embedding_provider = raw.parse()?;
        }
        cfg.embedding_api_key = env_var("EMBEDDING_API_KEY")
            .or_else(|| env_var("OPENAI_API_KEY"))
            .or_else(|| env_var("COHERE_API_KEY"))
            .or_else(|| env_var("HUGGINGFACE_API_KEY"));
        cfg.embedding_model = env_var("EMBEDDING_MODEL");
        cfg.embedding_base_url = env_var("EMBEDDING_BASE_URL");
        cfg.embedding_dimension = env_parse("EMBEDDING_DIMENSION")?;

        if let Some(v) = env_parse("CHUNK_SIZE")? {
            cfg.chunk_size = v;
        }
        if let Some(v) = env_parse("CHUNK_OVERLAP")? {
            cfg.chunk_overlap = v;
        }
        if let Some(v) = env_parse("SEARCH_LIMIT")? {
            cfg.search_limit = v;
        }
        if let Some(v) = env_parse("RRF_K")? {
            cfg.rrf_k = v;
        }

        if cfg.chunk_size == 0 {
            return Err(Error::InvalidArgument("CHUNK_SIZE must be positive".into()));
        }
        if cfg.chunk_overlap >= cfg.chunk_size {
            return Err(Error::InvalidArgument(
                "CHUNK_OVERLAP must be smaller than CHUNK_SIZE".into(),
            ));
        }

        Ok(cfg)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MemoryConfig::default();
        assert_eq!(cfg.chunk_size, 800);
        assert_eq!(cfg.chunk_overlap, 200);
        assert_eq!(cfg.search_limit, 20);
        assert_eq!(cfg.rrf_k, 60);
        assert_eq!(cfg.sync_workers, 4);
        assert_eq!(cfg.sync_queue_capacity, 1024);
    }

    #[test]
    fn provider_kind_parsing() {
        assert_eq!(
            "openai".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::OpenAi
        );
        assert_eq!(
            "OLLAMA".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Ollama
        );
        assert!("word2vec".parse::<EmbeddingProviderKind>().is_err());
    }
}
