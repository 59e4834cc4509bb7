//! Ollama embeddings provider for local models via `/api/embed`.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    embeddings::{EmbeddingProvider, map_http_error},
    error::Result,
};

pub struct OllamaEmbeddings {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl Default for OllamaEmbeddings {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaEmbeddings {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            dims: 768,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let req = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let resp = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| map_http_error("ollama", e))?
            .error_for_status()
            .map_err(|e| map_http_error("ollama", e))?
            .json::<EmbedResponse>()
            .await
            .map_err(|e| map_http_error("ollama", e))?;
        Ok(resp.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "ollama"
    }

    // Local models choke on large batches; keep requests small.
    fn max_batch(&self) -> usize {
        32
    }
}
