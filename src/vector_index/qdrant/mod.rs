
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{Distance, Point, PointPayload, SearchHit, VectorIndex};
use crate::KnowledgeError;
use crate::config::VectorIndexConfig;
use crate::http::{HttpClient, HttpError};

/// Blocking REST client for a Qdrant server
#[derive(Debug, Clone)]
pub struct QdrantClient {
    base_url: Url,
    api_key: Option<String>,
    http: HttpClient,
}

/// Every Qdrant response wraps its payload in `result`
#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionsResult {
    collections: Vec<CollectionDescription>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: u64,
    score: f32,
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest {
    vectors: VectorParams,
}

#[derive(Debug, Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    points: Vec<PointStruct<'a>>,
}

#[derive(Debug, Serialize)]
struct PointStruct<'a> {
    id: u64,
    vector: &'a [f32],
    payload: &'a PointPayload,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    score_threshold: f32,
    with_payload: bool,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    points: &'a [u64],
}

impl QdrantClient {
    #[inline]
    pub fn new(config: &VectorIndexConfig) -> Result<Self> {
        let base_url = config
            .qdrant_url()
            .context("Failed to generate Qdrant URL from config")?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
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
    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Check that the server answers the collection listing
    #[inline]
    pub fn ping(&self) -> Result<()> {
        self.collection_names()
            .context("Failed to reach Qdrant server")?;
        info!("Qdrant server at {} is reachable", self.base_url);
        Ok(())
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build Qdrant URL for {}", path))
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        self.api_key
            .as_deref()
            .map(|key| vec![("api-key", key)])
            .unwrap_or_default()
    }

    fn parse<T: DeserializeOwned>(body: &str) -> Result<T> {
        let response: QdrantResponse<T> =
            serde_json::from_str(body).context("Failed to parse Qdrant response")?;
        Ok(response.result)
    }

    #[inline]
    pub fn create(&self, name: &str, vector_size: usize, distance: Distance) -> Result<bool> {
        let url = self.url(&format!("/collections/{}", name))?;
        let body = serde_json::to_string(&CreateCollectionRequest {
            vectors: VectorParams {
                size: vector_size,
                distance: distance.as_str(),
            },
        })?;

        debug!("Creating Qdrant collection {} ({} dims)", name, vector_size);
        match self.http.put_json(url.as_str(), &body, &self.headers()) {
            Ok(response) => Self::parse::<bool>(&response),
            // Qdrant answers 409 when the collection already exists
            Err(HttpError::Status { status: 409, .. }) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to create collection {}", name)),
        }
    }

    #[inline]
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let url = self.url("/collections")?;
        let response = self.http.get(url.as_str(), &self.headers())?;
        let result: CollectionsResult = Self::parse(&response)?;
        Ok(result.collections.into_iter().map(|c| c.name).collect())
    }

    #[inline]
    pub fn upsert(&self, name: &str, points: &[Point]) -> Result<()> {
        let url = self.url(&format!("/collections/{}/points?wait=true", name))?;
        let body = serde_json::to_string(&UpsertRequest {
            points: points
                .iter()
                .map(|p| PointStruct {
                    id: p.id,
                    vector: &p.vector,
                    payload: &p.payload,
                })
                .collect(),
        })?;

        self.http
            .put_json(url.as_str(), &body, &self.headers())
            .with_context(|| format!("Failed to upload {} points to {}", points.len(), name))?;
        Ok(())
    }

    #[inline]
    pub fn query(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let url = self.url(&format!("/collections/{}/points/search", name))?;
        let body = serde_json::to_string(&SearchRequest {
            vector,
            limit,
            score_threshold,
            with_payload: true,
        })?;

        let response = self
            .http
            .post_json(url.as_str(), &body, &self.headers())
            .with_context(|| format!("Search in {} failed", name))?;
        let points: Vec<ScoredPoint> = Self::parse(&response)?;

        Ok(points
            .into_iter()
            .map(|p| SearchHit {
                id: p.id,
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }

    #[inline]
    pub fn delete(&self, name: &str, ids: &[u64]) -> Result<()> {
        let url = self.url(&format!("/collections/{}/points/delete?wait=true", name))?;
        let body = serde_json::to_string(&DeleteRequest { points: ids })?;

        self.http
            .post_json(url.as_str(), &body, &self.headers())
            .with_context(|| format!("Failed to delete {} points from {}", ids.len(), name))?;
        Ok(())
    }

    #[inline]
    pub fn count(&self, name: &str) -> Result<u64> {
        let url = self.url(&format!("/collections/{}/points/count", name))?;
        let response = self
            .http
            .post_json(url.as_str(), r#"{"exact":true}"#, &self.headers())
            .with_context(|| format!("Failed to count points in {}", name))?;
        let result: CountResult = Self::parse(&response)?;
        Ok(result.count)
    }

    async fn blocking<T, F>(&self, f: F) -> crate::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T> + Send + 'static,
    {
        let client = self.clone();
        tokio::task::spawn_blocking(move || f(client))
            .await
            .map_err(|e| KnowledgeError::VectorIndex(format!("Qdrant task failed: {}", e)))?
            .map_err(|e| KnowledgeError::VectorIndex(format!("{:#}", e)))
    }
}

#[async_trait]
impl VectorIndex for QdrantClient {
    #[inline]
    fn backend_name(&self) -> &'static str {
        "qdrant"
    }

    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> crate::Result<bool> {
        let name = name.to_string();
        self.blocking(move |c| c.create(&name, vector_size, distance))
            .await
    }

    async fn upload_points(&self, collection: &str, points: Vec<Point>) -> crate::Result<()> {
        let name = collection.to_string();
        self.blocking(move |c| c.upsert(&name, &points)).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> crate::Result<Vec<SearchHit>> {
        let name = collection.to_string();
        let vector = vector.to_vec();
        self.blocking(move |c| c.query(&name, &vector, limit, score_threshold))
            .await
    }

    async fn list_collections(&self) -> crate::Result<Vec<String>> {
        self.blocking(|c| c.collection_names()).await
    }

    async fn delete_points(&self, collection: &str, ids: &[u64]) -> crate::Result<()> {
        let name = collection.to_string();
        let ids = ids.to_vec();
        self.blocking(move |c| c.delete(&name, &ids)).await
    }

    async fn count_points(&self, collection: &str) -> crate::Result<u64> {
        let name = collection.to_string();
        self.blocking(move |c| c.count(&name)).await
    }
}
