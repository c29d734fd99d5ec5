// Vector index module
// Capability for collection-scoped point storage and similarity search, plus backends

pub mod lance;
pub mod memory;
pub mod qdrant;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, IndexBackend};
use crate::{KnowledgeError, Result};

pub use lance::LanceIndex;
pub use memory::MemoryIndex;
pub use qdrant::QdrantClient;

/// Similarity metric a collection is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
}

impl Distance {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
        }
    }

    #[inline]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "dot" => Some(Self::Dot),
            _ => None,
        }
    }
}

/// Payload stored next to every point
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PointPayload {
    /// The chunk text
    pub text: String,
    /// Name of the document the chunk came from
    pub title: String,
    pub topic: String,
}

/// One stored chunk: identifier, vector and payload
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// A search result, ranked by descending score
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    pub score: f32,
    pub payload: PointPayload,
}

/// Remote or embedded vector index holding one point set per collection.
///
/// `upload_points` is treated as all-or-nothing by the store; backends that can
/// accept part of a batch rely on `delete_points` for rollback.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Returns `false` when the index refuses, e.g. because the name is taken
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<bool>;

    async fn upload_points(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    /// Hits scoring below `score_threshold` are excluded by the index itself
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn delete_points(&self, collection: &str, ids: &[u64]) -> Result<()>;

    async fn count_points(&self, collection: &str) -> Result<u64>;
}

/// Build the vector index selected by the configuration.
///
/// In-memory mode always gets a fresh `MemoryIndex`.
#[inline]
pub async fn connect(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    if config.is_in_memory() {
        info!("Using transient in-memory vector index");
        return Ok(Arc::new(MemoryIndex::new()));
    }

    match config.vector_index.backend {
        IndexBackend::Qdrant => {
            let client = QdrantClient::new(&config.vector_index)
                .map_err(|e| KnowledgeError::Config(format!("{:#}", e)))?
                .with_timeout(Duration::from_secs(config.store.call_timeout_secs));
            info!("Using Qdrant vector index at {}", client.base_url());
            Ok(Arc::new(client))
        }
        IndexBackend::Lancedb => {
            let path = config.lancedb_path();
            let index = LanceIndex::open(&path).await?;
            info!("Using LanceDB vector index at {}", path.display());
            Ok(Arc::new(index))
        }
        IndexBackend::Memory => Ok(Arc::new(MemoryIndex::new())),
    }
}
