//! Cohere embeddings provider using the `/v1/embed` endpoint.
use async_trait::async_trait;
use {
    secrecy::ExposeSecret,
    serde::{Deserialize, Serialize},
};

use crate::{
    embeddings::{EmbeddingProvider, map_http_error},
    error::Result,
};

pub struct CohereEmbeddings {
    client: reqwest::Client,
    api_key: secrecy::Secret<String>,
    base_url: String,
    model: String,
    dims: usize,
}

impl CohereEmbeddings {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: secrecy::Secret::new(api_key),
            base_url: "https://api.cohere.ai".into(),
            model: "embed-english-v3.0".into(),
            dims: 1024,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for CohereEmbeddings {
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let req = EmbedRequest {
            model: &self.model,
            texts,
            input_type: "search_document",
        };
        let resp = self
            .client
            .post(format!("{}/v1/embed", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&req)
            .send()
            .await
            .map_err(|e| map_http_error("cohere", e))?
            .error_for_status()
            .map_err(|e| map_http_error("cohere", e))?
            .json::<EmbedResponse>()
            .await
            .map_err(|e| map_http_error("cohere", e))?;
        Ok(resp.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "cohere"
    }

    // Cohere caps embed batches at 96 texts.
    fn max_batch(&self) -> usize {
        96
    }
}
