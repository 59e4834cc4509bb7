//! HuggingFace feature-extraction provider: the hosted inference API or any
//! local endpoint speaking the same pipeline protocol.
use async_trait::async_trait;
use {
    secrecy::ExposeSecret,
    serde::Serialize,
};

use crate::{
    embeddings::{EmbeddingProvider, map_http_error},
    error::Result,
};

pub struct HuggingFaceEmbeddings {
    client: reqwest::Client,
    api_key: Option<secrecy::Secret<String>>,
    base_url: String,
    model: String,
    dims: usize,
}

impl HuggingFaceEmbeddings {
    /// The hosted API needs a key; a local endpoint usually does not.
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.map(secrecy::Secret::new),
            base_url: "https://api-inference.huggingface.co".into(),
            model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            dims: 384,
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
struct PipelineRequest<'a> {
    inputs: &'a [String],
    options: PipelineOptions,
}

#[derive(Serialize)]
struct PipelineOptions {
    wait_for_model: bool,
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceEmbeddings {
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let req = PipelineRequest {
            inputs: texts,
            options: PipelineOptions {
                wait_for_model: true,
            },
        };
        let mut builder = self.client.post(format!(
            "{}/pipeline/feature-extraction/{}",
            self.base_url, self.model
        ));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        let vectors = builder
            .json(&req)
            .send()
            .await
            .map_err(|e| map_http_error("huggingface", e))?
            .error_for_status()
            .map_err(|e| map_http_error("huggingface", e))?
            .json::<Vec<Vec<f32>>>()
            .await
            .map_err(|e| map_http_error("huggingface", e))?;
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}
