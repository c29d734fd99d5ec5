// Embeddings module
// Embedding capability, the Ollama client and document chunking

pub mod chunking;
pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use chunking::{Chunker, ChunkingConfig, TextChunker, estimate_token_count};
pub use ollama::OllamaClient;

/// Turns text into a fixed-length vector. The length is fixed per model.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Most texts `embed_batch` should be handed at once
    fn batch_size(&self) -> usize {
        1
    }

    /// One vector per text, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
