//! Embedding provider seam: one async interface over five HTTP providers.
//!
//! Providers implement a single `request` round-trip; the trait's provided
//! `embed_batch` adds internal batching, dimension validation and retry with
//! jittered exponential backoff for transient failures.
use std::{future::Future, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tracing::warn,
};

use crate::{
    config::{EmbeddingProviderKind, MemoryConfig},
    error::{Error, Result},
};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One provider round-trip for at most [`max_batch`](Self::max_batch)
    /// texts. Implementations map transport failures to
    /// `ProviderUnavailable` and rejections to `ProviderInvalid`.
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimension of every vector this provider returns.
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    fn name(&self) -> &str;

    /// Provider-specific maximum batch size per request.
    fn max_batch(&self) -> usize {
        100
    }

    /// Embed any number of texts: batches internally, retries transient
    /// failures, and rejects responses whose shape or dimension is wrong.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch().max(1)) {
            let vectors = with_retry(self.name(), || self.request(batch)).await?;
            if vectors.len() != batch.len() {
                return Err(Error::ProviderInvalid(format!(
                    "{} returned {} vectors for {} inputs",
                    self.name(),
                    vectors.len(),
                    batch.len()
                )));
            }
            for v in &vectors {
                if v.len() != self.dimensions() {
                    return Err(Error::ProviderInvalid(format!(
                        "{} returned a {}-dim vector, expected {}",
                        self.name(),
                        v.len(),
                        self.dimensions()
                    )));
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(std::slice::from_ref(&text.to_string()))
            .await?
            .pop()
            .ok_or_else(|| Error::ProviderInvalid("empty embedding response".into()))
    }
}

/// Retry transient provider errors with jittered exponential backoff.
async fn with_retry<T, F, Fut>(provider: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let jitter = Duration::from_millis(rand::random_range(0..=100));
                let delay = BACKOFF_BASE * 2u32.pow(attempt) + jitter;
                warn!(provider, error = %e, attempt, delay_ms = delay.as_millis() as u64, "embedding request failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

/// Map a reqwest failure onto the provider error kinds: connection-level
/// problems and 5xx/429 are transient, other HTTP statuses are permanent.
pub(crate) fn map_http_error(provider: &str, e: reqwest::Error) -> Error {
    if let Some(status) = e.status() {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Error::ProviderUnavailable(format!("{provider}: http {status}"))
        } else {
            Error::ProviderInvalid(format!("{provider}: http {status}"))
        }
    } else if e.is_decode() {
        Error::ProviderInvalid(format!("{provider}: {e}"))
    } else {
        Error::ProviderUnavailable(format!("{provider}: {e}"))
    }
}

/// Build the configured provider and check its dimension against
/// `EMBEDDING_DIMENSION` when that is set.
pub fn provider_from_config(cfg: &MemoryConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let key = cfg.embedding_api_key.clone();
    let require_key = |provider: &str| {
        key.clone().ok_or_else(|| {
            Error::ProviderInvalid(format!("{provider} requires an API key"))
        })
    };

    let provider: Arc<dyn EmbeddingProvider> = match cfg.embedding_provider {
        EmbeddingProviderKind::OpenAi => {
            let mut p = crate::embeddings_openai::OpenAiEmbeddings::new(require_key("openai")?);
            if let Some(model) = &cfg.embedding_model {
                let dims = cfg.embedding_dimension.unwrap_or(p.dimensions());
                p = p.with_model(model.clone(), dims);
            }
            if let Some(url) = &cfg.embedding_base_url {
                p = p.with_base_url(url.clone());
            }
            Arc::new(p)
        },
        EmbeddingProviderKind::Cohere => {
            let mut p = crate::embeddings_cohere::CohereEmbeddings::new(require_key("cohere")?);
            if let Some(model) = &cfg.embedding_model {
                let dims = cfg.embedding_dimension.unwrap_or(p.dimensions());
                p = p.with_model(model.clone(), dims);
            }
            Arc::new(p)
        },
        EmbeddingProviderKind::Ollama => {
            let mut p = crate::embeddings_ollama::OllamaEmbeddings::new();
            if let Some(model) = &cfg.embedding_model {
                let dims = cfg.embedding_dimension.unwrap_or(p.dimensions());
                p = p.with_model(model.clone(), dims);
            }
            if let Some(url) = &cfg.embedding_base_url {
                p = p.with_base_url(url.clone());
            }
            Arc::new(p)
        },
        EmbeddingProviderKind::HuggingFace => {
            let mut p = crate::embeddings_huggingface::HuggingFaceEmbeddings::new(key.clone());
            if let Some(model) = &cfg.embedding_model {
                let dims = cfg.embedding_dimension.unwrap_or(p.dimensions());
                p = p.with_model(model.clone(), dims);
            }
            if let Some(url) = &cfg.embedding_base_url {
                p = p.with_base_url(url.clone());
            }
            Arc::new(p)
        },
        EmbeddingProviderKind::LiteLlm => {
            let mut p = crate::embeddings_litellm::LiteLlmEmbeddings::new(key.clone());
            if let Some(model) = &cfg.embedding_model {
                let dims = cfg.embedding_dimension.unwrap_or(p.dimensions());
                p = p.with_model(model.clone(), dims);
            }
            if let Some(url) = &cfg.embedding_base_url {
                p = p.with_base_url(url.clone());
            }
            Arc::new(p)
        },
    };

    if let Some(expected) = cfg.embedding_dimension
        && provider.dimensions() != expected
    {
        return Err(Error::ProviderInvalid(format!(
            "EMBEDDING_DIMENSION={expected} but provider {} reports {}",
            provider.name(),
            provider.dimensions()
        )));
    }

    Ok(provider)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Keyword-based deterministic embedder used across the crate's tests.
    pub(crate) struct MockEmbedder;

    pub(crate) const KEYWORDS: [&str; 8] = [
        "rust", "python", "database", "memory", "search", "network", "cooking", "music",
    ];

    pub(crate) fn keyword_embedding(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        KEYWORDS
            .iter()
            .map(|kw| if lower.contains(kw) { 1.0 } else { 0.0 })
            .collect()
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbedder {
        async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| keyword_embedding(t)).collect())
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    struct SmallBatch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for SmallBatch {
        async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            assert!(texts.len() <= 2, "batch cap exceeded");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "small"
        }

        fn name(&self) -> &str {
            "small"
        }

        fn max_batch(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn embed_batch_respects_batch_cap() {
        let p = SmallBatch {
            calls: AtomicUsize::new(0),
        };
        let texts: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();
        let vectors = p.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(p.calls.load(Ordering::SeqCst), 3);
    }

    struct WrongDim;

    #[async_trait]
    impl EmbeddingProvider for WrongDim {
        async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "wrong"
        }

        fn name(&self) -> &str {
            "wrong"
        }
    }

    #[tokio::test]
    async fn wrong_dimension_is_provider_invalid() {
        let err = WrongDim.embed_batch(&["x".into()]).await.unwrap_err();
        assert_eq!(err.kind(), "ProviderInvalid");
    }

    struct FlakyOnce {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyOnce {
        async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::ProviderUnavailable("503".into()));
            }
            Ok(texts.iter().map(|_| vec![0.0; 2]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "flaky"
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let p = FlakyOnce {
            failures_left: AtomicUsize::new(2),
        };
        let vectors = p.embed_batch(&["x".into()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_give_up_after_three_attempts() {
        let p = FlakyOnce {
            failures_left: AtomicUsize::new(10),
        };
        let err = p.embed_batch(&["x".into()]).await.unwrap_err();
        assert_eq!(err.kind(), "ProviderUnavailable");
        assert_eq!(p.failures_left.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn embed_query_returns_one_vector() {
        let v = MockEmbedder.embed_query("rust memory").await.unwrap();
        assert_eq!(v.len(), 8);
        assert_eq!(v[0], 1.0); // "rust"
        assert_eq!(v[3], 1.0); // "memory"
        assert_eq!(v[6], 0.0); // not "cooking"
    }

    #[test]
    fn dimension_mismatch_rejected_at_construction() {
        let cfg = MemoryConfig {
            embedding_provider: EmbeddingProviderKind::OpenAi,
            embedding_api_key: Some("sk-test".into()),
            embedding_dimension: Some(42),
            ..Default::default()
        };
        let err = provider_from_config(&cfg).err().unwrap();
        assert_eq!(err.kind(), "ProviderInvalid");
    }

    #[test]
    fn missing_key_rejected() {
        let cfg = MemoryConfig {
            embedding_provider: EmbeddingProviderKind::OpenAi,
            embedding_api_key: None,
            ..Default::default()
        };
        let err = provider_from_config(&cfg).err().unwrap();
        assert_eq!(err.kind(), "ProviderInvalid");
    }
}
