
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::Embedder;
use crate::KnowledgeError;
use crate::config::OllamaConfig;
use crate::http::HttpClient;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    http: HttpClient,
}

/// `input` is either one string or a list of strings
#[derive(Debug, Serialize)]
struct EmbedRequest<'a, I: Serialize> {
    model: &'a str,
    input: I,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size,
            http: HttpClient::default(),
        })
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = self.http.with_timeout(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.http = self.http.with_retry_attempts(attempts);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build Ollama URL for {}", path))
    }

    /// Check the server answers and serves the configured model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        self.ping().context("Ollama server is not responding")?;
        self.validate_model()?;

        info!("Ollama at {} is serving {}", self.base_url, self.model);
        Ok(())
    }

    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self.endpoint("/api/tags")?;
        debug!("Pinging Ollama at {}", url);
        self.http.get(url.as_str(), &[])?;
        Ok(())
    }

    /// The model may be listed bare or with the implicit `:latest` tag
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let models = self.list_models()?;
        let tagged = format!("{}:latest", self.model);
        if models.iter().any(|m| m.name == self.model || m.name == tagged) {
            return Ok(());
        }

        let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        warn!("Model {} missing from Ollama, found {:?}", self.model, available);
        anyhow::bail!(
            "Model '{}' is not available. Available models: {:?}",
            self.model,
            available
        )
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;
        let body = self
            .http
            .get(url.as_str(), &[])
            .context("Failed to fetch Ollama models")?;
        let response: ModelsResponse =
            serde_json::from_str(&body).context("Failed to parse models response")?;

        debug!("Ollama lists {} models", response.models.len());
        Ok(response.models)
    }

    /// Embed one text
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self
            .request_embeddings(text, 1)
            .context("Failed to generate embedding")?;
        let embedding = embeddings.swap_remove(0);

        debug!("Embedded {} chars into {} dimensions", text.len(), embedding.len());
        Ok(embedding)
    }

    /// Embed many texts, sending at most `batch_size` per request
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch_size = Embedder::batch_size(self);
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            let vectors = self
                .request_embeddings(batch, batch.len())
                .with_context(|| format!("Failed to embed a batch of {} texts", batch.len()))?;
            embeddings.extend(vectors);
        }

        debug!("Embedded {} texts in batches of {}", texts.len(), batch_size);
        Ok(embeddings)
    }

    async fn blocking<T, F>(&self, f: F) -> crate::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T> + Send + 'static,
    {
        let client = self.clone();
        tokio::task::spawn_blocking(move || f(client))
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| KnowledgeError::Embedding(format!("{:#}", e)))
    }

    fn request_embeddings<I: Serialize>(&self, input: I, expected: usize) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("/api/embed")?;
        let body = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input,
        })?;

        let response = self.http.post_json(url.as_str(), &body, &[])?;
        let parsed: EmbedResponse =
            serde_json::from_str(&response).context("Failed to parse embedding response")?;

        if parsed.embeddings.len() != expected {
            anyhow::bail!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                expected
            );
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        let text = text.to_string();
        self.blocking(move |client| client.generate_embedding(&text))
            .await
    }

    #[inline]
    fn batch_size(&self) -> usize {
        usize::try_from(self.batch_size).unwrap_or(1).max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        self.blocking(move |client| client.generate_embeddings_batch(&texts))
            .await
    }
}
