// Knowledge store
// Collection lifecycle, chunk/embed/upload ingestion and routed retrieval

pub mod reconcile;

#[cfg(test)]
mod tests;

use futures::{StreamExt, TryStreamExt, stream};
use std::collections::HashMap;
use std::future::Future;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{Config, StoreConfig};
use crate::embeddings::{Chunker, Embedder, OllamaClient, TextChunker};
use crate::metadata::MetadataStore;
use crate::models::{Collection, Document, validate_title};
use crate::routing::{Router, StaticRouter};
use crate::vector_index::{self, Distance, Point, PointPayload, SearchHit, VectorIndex};
use crate::{KnowledgeError, Result};

pub use reconcile::{ReconciliationReport, Reconciler};

/// Text embedded once at startup to learn the vector width
pub const SIZING_TEXT: &str = "init";
/// Shorter queries are answered with no result
pub const MIN_QUERY_CHARS: usize = 3;
pub const SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_LIMIT: usize = 3;

type SharedCollection = Arc<Mutex<Collection>>;
type CreationLocks = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// A title's creation lock; the map entry goes away with its last holder
struct CreationSlot<'a> {
    locks: &'a CreationLocks,
    title: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this slot still hold it
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.title);
        }
    }
}

/// Run an external call with a caller-side deadline
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {:?}", operation, limit);
            Err(KnowledgeError::Timeout {
                operation: operation.to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}

fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(KnowledgeError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub call_timeout: Duration,
    /// Chunks of one document embedded at the same time
    pub embedding_concurrency: usize,
}

impl Default for StoreSettings {
    #[inline]
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for StoreSettings {
    #[inline]
    fn from(config: &StoreConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            embedding_concurrency: config.embedding_concurrency.max(1),
        }
    }
}

/// Point ids allocated to one uploaded document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub collection: String,
    pub ids: Range<u64>,
}

impl UploadReceipt {
    #[inline]
    pub fn chunk_count(&self) -> u64 {
        self.ids.end - self.ids.start
    }
}

pub struct KnowledgeStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: Arc<dyn Chunker>,
    router: Option<Arc<dyn Router>>,
    /// `None` in in-memory mode
    metadata: Option<MetadataStore>,
    settings: StoreSettings,
    embedding_size: usize,
    collections: RwLock<HashMap<String, SharedCollection>>,
    /// Serializes check-then-create per title
    creation_locks: CreationLocks,
    report: ReconciliationReport,
}

pub struct KnowledgeStoreBuilder {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: Arc<dyn Chunker>,
    router: Option<Arc<dyn Router>>,
    metadata_dir: Option<PathBuf>,
    settings: StoreSettings,
}

impl KnowledgeStoreBuilder {
    #[inline]
    #[must_use]
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    #[inline]
    #[must_use]
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Persist metadata under `dir` and reconcile it at startup
    #[inline]
    #[must_use]
    pub fn persistent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metadata_dir = Some(dir.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Measure the embedding width, then reconcile when persistent.
    /// Either failing aborts construction.
    #[inline]
    pub async fn build(self) -> Result<KnowledgeStore> {
        let sample = with_timeout(
            "measure embedding size",
            self.settings.call_timeout,
            self.embedder.embed(SIZING_TEXT),
        )
        .await?;
        if sample.is_empty() {
            return Err(KnowledgeError::Embedding(format!(
                "Model {} returned an empty vector for the sizing text",
                self.embedder.model_name()
            )));
        }
        let embedding_size = sample.len();
        info!(
            "Embedding model {} produces {} dimensions",
            self.embedder.model_name(),
            embedding_size
        );

        let metadata = self.metadata_dir.map(MetadataStore::new);
        let (collections, report) = match &metadata {
            Some(metadata) => {
                Reconciler::new(self.index.as_ref(), metadata, self.settings.call_timeout)
                    .run()
                    .await?
            }
            None => {
                debug!("In-memory mode, skipping reconciliation");
                (HashMap::new(), ReconciliationReport::default())
            }
        };

        Ok(KnowledgeStore {
            embedder: self.embedder,
            index: self.index,
            chunker: self.chunker,
            router: self.router,
            metadata,
            settings: self.settings,
            embedding_size,
            collections: RwLock::new(
                collections
                    .into_iter()
                    .map(|(title, c)| (title, Arc::new(Mutex::new(c))))
                    .collect(),
            ),
            creation_locks: std::sync::Mutex::new(HashMap::new()),
            report,
        })
    }
}

impl KnowledgeStore {
    #[inline]
    pub fn builder(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> KnowledgeStoreBuilder {
        KnowledgeStoreBuilder {
            embedder,
            index,
            chunker: Arc::new(TextChunker::default()),
            router: None,
            metadata_dir: None,
            settings: StoreSettings::default(),
        }
    }

    /// Wire the Ollama embedder, the configured vector index, the default chunker
    /// and a `StaticRouter` on `store.default_collection`
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let settings = StoreSettings::from(&config.store);
        let embedder = OllamaClient::new(&config.ollama)
            .map_err(|e| KnowledgeError::Config(format!("{:#}", e)))?
            .with_timeout(settings.call_timeout);
        let index = vector_index::connect(config).await?;

        let mut builder = Self::builder(Arc::new(embedder), index)
            .chunker(Arc::new(TextChunker::new(config.chunking.clone())))
            .router(Arc::new(StaticRouter::new(
                config.store.default_collection.clone(),
            )))
            .settings(settings);
        if !config.is_in_memory() {
            builder = builder.persistent(config.metadata_dir());
        }
        builder.build().await
    }

    #[inline]
    pub fn embedding_size(&self) -> usize {
        self.embedding_size
    }

    #[inline]
    pub fn is_in_memory(&self) -> bool {
        self.metadata.is_none()
    }

    #[inline]
    pub fn vector_backend(&self) -> &'static str {
        self.index.backend_name()
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// What startup reconciliation found; empty in in-memory mode
    #[inline]
    pub fn reconciliation_report(&self) -> &ReconciliationReport {
        &self.report
    }

    #[inline]
    pub fn set_router(&mut self, router: Arc<dyn Router>) {
        self.router = Some(router);
    }

    /// Snapshot of every registered collection keyed by title
    #[inline]
    pub async fn collections(&self) -> HashMap<String, Collection> {
        let shared: Vec<SharedCollection> = self.collections.read().await.values().cloned().collect();
        let mut snapshot = HashMap::with_capacity(shared.len());
        for collection in shared {
            let collection = collection.lock().await.clone();
            snapshot.insert(collection.title.clone(), collection);
        }
        snapshot
    }

    #[inline]
    pub async fn get_collection(&self, name: &str) -> Option<Collection> {
        let shared = self.collections.read().await.get(name).cloned()?;
        let collection = shared.lock().await.clone();
        Some(collection)
    }

    /// One past the highest collection id in use
    #[inline]
    pub async fn next_collection_id(&self) -> u64 {
        self.collections()
            .await
            .values()
            .map(|c| c.collection_id)
            .max()
            .map_or(0, |id| id + 1)
    }

    fn creation_slot(&self, title: &str) -> CreationSlot<'_> {
        let mut locks = self
            .creation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(title.to_string()).or_default());
        CreationSlot {
            locks: &self.creation_locks,
            title: title.to_string(),
            lock,
        }
    }

    /// Create the remote collection and register it.
    ///
    /// Returns `Ok(false)` when the title is already registered. Documents attached
    /// to `collection` are ingested in order after registration; if one fails the
    /// ones before it stay recorded and persisted and the error is returned.
    #[inline]
    pub async fn create_collection(&self, collection: Collection) -> Result<bool> {
        validate_title(&collection.title)?;
        let title = collection.title.clone();

        let slot = self.creation_slot(&title);
        let _guard = slot.lock.lock().await;

        if self.collections.read().await.contains_key(&title) {
            debug!("Collection {} already exists, nothing to create", title);
            return Ok(false);
        }

        let created = with_timeout(
            "create collection",
            self.settings.call_timeout,
            self.index
                .create_collection(&title, self.embedding_size, Distance::Cosine),
        )
        .await?;
        if !created {
            return Err(KnowledgeError::CollectionRejected(title));
        }

        let mut registered = collection;
        let documents = std::mem::take(&mut registered.documents);
        registered.size = 0;
        let shared = Arc::new(Mutex::new(registered));
        self.collections
            .write()
            .await
            .insert(title.clone(), Arc::clone(&shared));

        let document_count = documents.len();
        let mut ingested = Ok(());
        for document in documents {
            if let Err(e) = self.ingest(document, &title, &shared).await {
                ingested = Err(e);
                break;
            }
        }

        let persisted = self.persist(&shared).await;
        if let Err(e) = ingested {
            if let Err(persist_error) = &persisted {
                warn!(
                    "Collection {}: metadata not saved after failed ingest: {}",
                    title, persist_error
                );
            }
            return Err(e);
        }
        persisted?;

        info!(
            "Collection {}: initialized with {} documents",
            title, document_count
        );
        Ok(true)
    }

    /// Chunk, embed and upload one document into a registered collection
    #[inline]
    pub async fn upload(&self, document: Document, collection_name: &str) -> Result<UploadReceipt> {
        let shared = self
            .collections
            .read()
            .await
            .get(collection_name)
            .cloned()
            .ok_or_else(|| KnowledgeError::CollectionNotFound(collection_name.to_string()))?;

        let receipt = self.ingest(document, collection_name, &shared).await?;
        self.persist(&shared).await?;

        info!(
            "Collection {}: uploaded {} chunks as points {:?}",
            collection_name,
            receipt.chunk_count(),
            receipt.ids
        );
        Ok(receipt)
    }

    async fn ingest(
        &self,
        document: Document,
        collection_name: &str,
        shared: &SharedCollection,
    ) -> Result<UploadReceipt> {
        let chunks = self.chunker.chunk(&document)?;
        debug!("Document {} split into {} chunks", document.name, chunks.len());
        let vectors = self.embed_chunks(&chunks).await?;

        // Held from reading `size` until it is advanced
        let mut collection = shared.lock().await;
        let start = collection.size;
        let end = start + chunks.len() as u64;

        if !chunks.is_empty() {
            let topic = document.topic.name().to_string();
            let points: Vec<Point> = chunks
                .into_iter()
                .zip(vectors)
                .zip(start..end)
                .map(|((text, vector), id)| Point {
                    id,
                    vector,
                    payload: PointPayload {
                        text,
                        title: document.name.clone(),
                        topic: topic.clone(),
                    },
                })
                .collect();

            if let Err(e) = self.upload_settled(collection_name, points).await {
                self.rollback(collection_name, start..end).await;
                return Err(e);
            }
            collection.size = end;
        }

        collection.record_document(document);
        Ok(UploadReceipt {
            collection: collection_name.to_string(),
            ids: start..end,
        })
    }

    /// Upload under the call timeout. On timeout the call is still awaited so a
    /// late write cannot land after the rollback.
    async fn upload_settled(&self, collection_name: &str, points: Vec<Point>) -> Result<()> {
        let index = Arc::clone(&self.index);
        let name = collection_name.to_string();
        let mut task = tokio::spawn(async move { index.upload_points(&name, points).await });

        let limit = self.settings.call_timeout;
        let joined = match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    "Collection {}: upload timed out after {:?}, waiting for it to settle",
                    collection_name, limit
                );
                if let Ok(Err(e)) = task.await {
                    debug!("Collection {}: late upload failed: {}", collection_name, e);
                }
                return Err(KnowledgeError::Timeout {
                    operation: "upload points".to_string(),
                    seconds: limit.as_secs(),
                });
            }
        };
        joined.map_err(|e| KnowledgeError::VectorIndex(format!("Upload task failed: {}", e)))?
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = with_timeout(
            "embed chunks",
            self.settings.call_timeout,
            self.embedder.embed_batch(batch),
        )
        .await?;
        if vectors.len() != batch.len() {
            return Err(KnowledgeError::Embedding(format!(
                "Model {} returned {} vectors for {} chunks",
                self.embedder.model_name(),
                vectors.len(),
                batch.len()
            )));
        }
        for vector in &vectors {
            check_dimension(self.embedding_size, vector)?;
        }
        Ok(vectors)
    }

    /// Embed batches concurrently while keeping chunk order
    async fn embed_chunks(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.embedder.batch_size().max(1);
        let pending: Vec<_> = chunks
            .chunks(batch_size)
            .map(|batch| self.embed_batch(batch))
            .collect();

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(pending)
            .buffered(self.settings.embedding_concurrency.max(1))
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }

    /// Best effort; the index may have kept part of a failed batch
    async fn rollback(&self, collection_name: &str, ids: Range<u64>) {
        let ids: Vec<u64> = ids.collect();
        match with_timeout(
            "delete points",
            self.settings.call_timeout,
            self.index.delete_points(collection_name, &ids),
        )
        .await
        {
            Ok(()) => warn!(
                "Collection {}: upload failed, removed {} partially uploaded points",
                collection_name,
                ids.len()
            ),
            Err(e) => warn!(
                "Collection {}: upload failed and rollback of {} points failed: {}",
                collection_name,
                ids.len(),
                e
            ),
        }
    }

    async fn persist(&self, shared: &SharedCollection) -> Result<()> {
        let Some(metadata) = &self.metadata else {
            return Ok(());
        };

        // Saving under the lock keeps concurrent writers in order
        let collection = shared.lock().await;
        with_timeout(
            "write metadata",
            self.settings.call_timeout,
            metadata.save(&collection),
        )
        .await?;
        Ok(())
    }

    /// Route the query to a collection, then search it
    #[inline]
    pub async fn retrieve(&self, query: &str, limit: usize) -> Result<Option<Vec<SearchHit>>> {
        let router = self.router.as_ref().ok_or_else(|| {
            KnowledgeError::Config("retrieve requires a query router".to_string())
        })?;

        let collections = self.collections().await;
        let route = router.find_route(query, &collections).await?;
        debug!("Query routed to collection {}", route);

        self.retrieve_from(query, &route, limit).await
    }

    /// Search one collection. Queries under three characters return `None`
    /// without touching any service.
    #[inline]
    pub async fn retrieve_from(
        &self,
        query: &str,
        collection_name: &str,
        limit: usize,
    ) -> Result<Option<Vec<SearchHit>>> {
        if query.chars().count() < MIN_QUERY_CHARS {
            debug!("Query {:?} is too short to search", query);
            return Ok(None);
        }

        if !self.collections.read().await.contains_key(collection_name) {
            return Err(KnowledgeError::CollectionNotFound(
                collection_name.to_string(),
            ));
        }

        let vector = with_timeout(
            "embed query",
            self.settings.call_timeout,
            self.embedder.embed(query),
        )
        .await?;
        check_dimension(self.embedding_size, &vector)?;

        let hits = with_timeout(
            "search",
            self.settings.call_timeout,
            self.index
                .search(collection_name, &vector, limit, SCORE_THRESHOLD),
        )
        .await?;

        debug!(
            "Collection {}: {} hits for query {:?}",
            collection_name,
            hits.len(),
            query
        );
        Ok(Some(hits))
    }
}
