
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use super::{Distance, Point, SearchHit, VectorIndex};
use crate::{KnowledgeError, Result};

struct MemoryCollection {
    vector_size: usize,
    distance: Distance,
    points: BTreeMap<u64, Point>,
}

/// Transient in-process index; everything is lost when it is dropped
#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(collection: &str) -> KnowledgeError {
    KnowledgeError::VectorIndex(format!("Collection '{}' does not exist", collection))
}

/// Cosine similarity in [-1, 1]; zero vectors score 0
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    #[inline]
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<bool> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            debug!("Collection {} already exists in memory", name);
            return Ok(false);
        }

        collections.insert(
            name.to_string(),
            MemoryCollection {
                vector_size,
                distance,
                points: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn upload_points(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;

        // Validate the whole batch before touching anything
        if let Some(bad) = points
            .iter()
            .find(|p| p.vector.len() != target.vector_size)
        {
            return Err(KnowledgeError::VectorIndex(format!(
                "Point {} has {} dimensions, collection '{}' expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                target.vector_size
            )));
        }

        for point in points {
            target.points.insert(point.id, point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;

        let mut hits: Vec<SearchHit> = target
            .points
            .values()
            .map(|point| {
                let score = match target.distance {
                    Distance::Cosine => cosine_similarity(vector, &point.vector),
                    Distance::Dot => dot_product(vector, &point.vector),
                };
                SearchHit {
                    id: point.id,
                    score,
                    payload: point.payload.clone(),
                }
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_points(&self, collection: &str, ids: &[u64]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;

        for id in ids {
            target.points.remove(id);
        }
        Ok(())
    }

    async fn count_points(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(target.points.len() as u64)
    }
}
