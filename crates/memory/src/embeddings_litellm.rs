//! LiteLLM proxy provider: OpenAI-compatible `/v1/embeddings` against a
//! locally-run router.
use async_trait::async_trait;
use {
    secrecy::ExposeSecret,
    serde::{Deserialize, Serialize},
};

use crate::{
    embeddings::{EmbeddingProvider, map_http_error},
    error::Result,
};

pub struct LiteLlmEmbeddings {
    client: reqwest::Client,
    api_key: Option<secrecy::Secret<String>>,
    base_url: String,
    model: String,
    dims: usize,
}

impl LiteLlmEmbeddings {
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.map(secrecy::Secret::new),
            base_url: "http://localhost:4000".into(),
            model: "text-embedding-3-small".into(),
            dims: 1536,
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
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for LiteLlmEmbeddings {
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let req = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut builder = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        let resp = builder
            .json(&req)
            .send()
            .await
            .map_err(|e| map_http_error("litellm", e))?
            .error_for_status()
            .map_err(|e| map_http_error("litellm", e))?
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| map_http_error("litellm", e))?;
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "litellm"
    }
}
