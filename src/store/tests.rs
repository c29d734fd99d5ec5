use super::*;
use crate::models::Topic;
use crate::vector_index::MemoryIndex;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// Maps text onto three axes by keyword and counts calls
#[derive(Default)]
struct KeywordEmbedder {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl KeywordEmbedder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if text.contains("broken") {
            return Ok(vec![1.0, 0.0]);
        }
        Ok(if text.contains("nginx") {
            vec![1.0, 0.0, 0.0]
        } else if text.contains("logs") {
            vec![0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0]
        })
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "offline"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(KnowledgeError::Embedding("connection refused".to_string()))
    }
}

/// Embeds in batches and records how the chunks were grouped
struct BatchingEmbedder {
    batches: std::sync::Mutex<Vec<usize>>,
}

#[async_trait]
impl Embedder for BatchingEmbedder {
    fn model_name(&self) -> &str {
        "batching"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }

    fn batch_size(&self) -> usize {
        2
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.lock().expect("lock").push(texts.len());
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

/// One chunk per non-empty line
struct LineChunker;

impl Chunker for LineChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<String>> {
        Ok(document
            .content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Memory index that records calls and can be told to fail
#[derive(Default)]
struct RecordingIndex {
    inner: MemoryIndex,
    creates: AtomicUsize,
    upload_calls: AtomicUsize,
    fail_uploads: AtomicBool,
    reject_creates: AtomicBool,
    /// Upload lands in the index only after this delay
    upload_delay: Option<Duration>,
    uploaded_ids: std::sync::Mutex<Vec<Vec<u64>>>,
    deleted_ids: std::sync::Mutex<Vec<Vec<u64>>>,
}

impl RecordingIndex {
    fn uploaded_ids(&self) -> Vec<Vec<u64>> {
        self.uploaded_ids.lock().expect("lock").clone()
    }

    fn deleted_ids(&self) -> Vec<Vec<u64>> {
        self.deleted_ids.lock().expect("lock").clone()
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    fn backend_name(&self) -> &'static str {
        "recording"
    }

    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<bool> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.reject_creates.load(Ordering::SeqCst) {
            return Ok(false);
        }
        // Widen the check-then-create window
        tokio::task::yield_now().await;
        self.inner.create_collection(name, vector_size, distance).await
    }

    async fn upload_points(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        let ids: Vec<u64> = points.iter().map(|p| p.id).collect();
        if self.fail_uploads.load(Ordering::SeqCst) {
            // Simulate a service that kept the first point before failing
            let partial = points.into_iter().take(1).collect();
            self.inner.upload_points(collection, partial).await?;
            return Err(KnowledgeError::VectorIndex("upload rejected".to_string()));
        }
        self.uploaded_ids.lock().expect("lock").push(ids);
        self.inner.upload_points(collection, points).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        self.inner
            .search(collection, vector, limit, score_threshold)
            .await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn delete_points(&self, collection: &str, ids: &[u64]) -> Result<()> {
        self.deleted_ids.lock().expect("lock").push(ids.to_vec());
        self.inner.delete_points(collection, ids).await
    }

    async fn count_points(&self, collection: &str) -> Result<u64> {
        self.inner.count_points(collection).await
    }
}

struct Harness {
    embedder: Arc<KeywordEmbedder>,
    index: Arc<RecordingIndex>,
}

impl Harness {
    fn new() -> Self {
        Self {
            embedder: Arc::new(KeywordEmbedder::default()),
            index: Arc::new(RecordingIndex::default()),
        }
    }

    fn builder(&self) -> KnowledgeStoreBuilder {
        KnowledgeStore::builder(self.embedder.clone(), self.index.clone())
            .chunker(Arc::new(LineChunker))
    }

    fn with_index(index: RecordingIndex) -> Self {
        Self {
            embedder: Arc::new(KeywordEmbedder::default()),
            index: Arc::new(index),
        }
    }

    async fn in_memory(&self) -> KnowledgeStore {
        self.builder().build().await.expect("store should build")
    }
}

fn runbook(name: &str, lines: usize) -> Document {
    let content = (0..lines)
        .map(|i| format!("step {i}: restart nginx"))
        .collect::<Vec<_>>()
        .join("\n");
    Document::new(name, content, "linux")
}

#[tokio::test]
async fn build_measures_embedding_size_once() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    assert_eq!(store.embedding_size(), 3);
    assert_eq!(harness.embedder.calls(), 1);
    assert!(store.is_in_memory());
    assert!(store.collections().await.is_empty());
    assert_eq!(store.reconciliation_report(), &ReconciliationReport::default());
}

#[tokio::test]
async fn unreachable_embedder_is_fatal_at_startup() {
    let result = KnowledgeStore::builder(Arc::new(FailingEmbedder), Arc::new(MemoryIndex::new()))
        .build()
        .await;

    assert!(matches!(result, Err(KnowledgeError::Embedding(_))));
}

#[tokio::test]
async fn create_collection_is_idempotent_by_title() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    assert!(
        store
            .create_collection(Collection::new(0, "ops"))
            .await
            .expect("create should succeed")
    );
    assert!(
        !store
            .create_collection(Collection::new(1, "ops").with_topic("other"))
            .await
            .expect("second create should be a no-op")
    );

    assert_eq!(harness.index.creates.load(Ordering::SeqCst), 1);
    let stored = store.get_collection("ops").await.expect("collection exists");
    assert_eq!(stored.collection_id, 0);
    assert!(stored.topics.is_empty());
}

#[tokio::test]
async fn concurrent_creation_of_one_title_creates_once() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    let (first, second) = tokio::join!(
        store.create_collection(Collection::new(0, "ops")),
        store.create_collection(Collection::new(0, "ops")),
    );

    let created = [first.expect("first"), second.expect("second")];
    assert_eq!(created.iter().filter(|c| **c).count(), 1);
    assert_eq!(harness.index.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_title_is_refused_before_any_call() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    let result = store.create_collection(Collection::new(0, "../etc")).await;

    assert!(matches!(result, Err(KnowledgeError::InvalidTitle(_))));
    assert_eq!(harness.index.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_creation_leaves_state_unchanged() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new();
    harness.index.reject_creates.store(true, Ordering::SeqCst);
    let store = harness
        .builder()
        .persistent(temp_dir.path())
        .build()
        .await
        .expect("store should build");

    let result = store
        .create_collection(Collection::new(0, "ops").with_document(runbook("a", 2)))
        .await;

    assert!(matches!(result, Err(KnowledgeError::CollectionRejected(_))));
    assert!(store.get_collection("ops").await.is_none());
    assert!(!temp_dir.path().join("ops.json").exists());
    assert_eq!(harness.index.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn point_ids_continue_from_collection_size() {
    let harness = Harness::new();
    let store = harness.in_memory().await;
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");

    let first = store
        .upload(runbook("restart", 4), "ops")
        .await
        .expect("upload should succeed");
    let second = store
        .upload(runbook("reload", 2), "ops")
        .await
        .expect("upload should succeed");

    assert_eq!(first.ids, 0..4);
    assert_eq!(second.ids, 4..6);
    assert_eq!(second.chunk_count(), 2);
    assert_eq!(harness.index.uploaded_ids(), vec![vec![0, 1, 2, 3], vec![4, 5]]);

    let stored = store.get_collection("ops").await.expect("collection exists");
    assert_eq!(stored.size, 6);
    let names: Vec<&str> = stored.documents.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["restart", "reload"]);
}

#[tokio::test]
async fn pre_attached_documents_are_ingested_in_order() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    let collection = Collection::new(3, "ops")
        .with_document(runbook("first", 3))
        .with_document(runbook("second", 1));
    store
        .create_collection(collection)
        .await
        .expect("create should succeed");

    assert_eq!(harness.index.uploaded_ids(), vec![vec![0, 1, 2], vec![3]]);
    let stored = store.get_collection("ops").await.expect("collection exists");
    assert_eq!(stored.size, 4);
    assert_eq!(stored.documents.len(), 2);
}

#[tokio::test]
async fn upload_to_unknown_collection_fails_without_calls() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    let result = store.upload(runbook("a", 2), "missing").await;

    assert!(matches!(result, Err(KnowledgeError::CollectionNotFound(name)) if name == "missing"));
    assert_eq!(harness.embedder.calls(), 1);
    assert_eq!(harness.index.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_upload_does_not_advance_size_and_rolls_back() {
    let harness = Harness::new();
    let store = harness.in_memory().await;
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");
    store
        .upload(runbook("first", 2), "ops")
        .await
        .expect("upload should succeed");

    harness.index.fail_uploads.store(true, Ordering::SeqCst);
    let result = store.upload(runbook("second", 3), "ops").await;
    assert!(matches!(result, Err(KnowledgeError::VectorIndex(_))));

    let stored = store.get_collection("ops").await.expect("collection exists");
    assert_eq!(stored.size, 2);
    assert!(!stored.has_document("second"));
    assert_eq!(harness.index.deleted_ids(), vec![vec![2, 3, 4]]);
    assert_eq!(harness.index.inner.count_points("ops").await.expect("count"), 2);

    harness.index.fail_uploads.store(false, Ordering::SeqCst);
    let retry = store
        .upload(runbook("second", 3), "ops")
        .await
        .expect("retry should succeed");
    assert_eq!(retry.ids, 2..5);
}

#[tokio::test]
async fn wrong_embedding_width_aborts_upload() {
    let harness = Harness::new();
    let store = harness.in_memory().await;
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");

    let document = Document::new("bad", "fine line\nbroken line", "t");
    let result = store.upload(document, "ops").await;

    assert!(matches!(
        result,
        Err(KnowledgeError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
    assert_eq!(harness.index.upload_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.get_collection("ops").await.expect("exists").size, 0);
}

#[tokio::test]
async fn empty_document_uploads_nothing() {
    let harness = Harness::new();
    let store = harness.in_memory().await;
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");

    let receipt = store
        .upload(Document::new("blank", "\n  \n", "misc"), "ops")
        .await
        .expect("upload should succeed");

    assert_eq!(receipt.ids, 0..0);
    assert_eq!(harness.index.upload_calls.load(Ordering::SeqCst), 0);
    let stored = store.get_collection("ops").await.expect("exists");
    assert!(stored.has_document("blank"));
    assert_eq!(stored.size, 0);
}

#[tokio::test]
async fn concurrent_uploads_get_disjoint_ids() {
    let harness = Harness::new();
    let store = Arc::new(harness.in_memory().await);
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.upload(runbook(&format!("doc{i}"), 3), "ops").await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let receipt = task.await.expect("task").expect("upload should succeed");
        ids.extend(receipt.ids);
    }
    ids.sort_unstable();

    assert_eq!(ids, (0..24).collect::<Vec<u64>>());
    assert_eq!(store.get_collection("ops").await.expect("exists").size, 24);
}

#[tokio::test]
async fn slow_embedder_times_out() {
    let embedder = Arc::new(KeywordEmbedder {
        delay: Some(Duration::from_millis(200)),
        ..KeywordEmbedder::default()
    });
    let result = KnowledgeStore::builder(embedder, Arc::new(MemoryIndex::new()))
        .settings(StoreSettings {
            call_timeout: Duration::from_millis(20),
            embedding_concurrency: 1,
        })
        .build()
        .await;

    assert!(matches!(result, Err(KnowledgeError::Timeout { .. })));
}

#[tokio::test]
async fn retrieve_requires_router() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    let result = store.retrieve("restart nginx", 3).await;
    assert!(matches!(result, Err(KnowledgeError::Config(_))));
}

#[tokio::test]
async fn short_queries_return_none_without_calls() {
    let harness = Harness::new();
    let store = harness.in_memory().await;
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");
    let calls_before = harness.embedder.calls();

    assert!(store.retrieve_from("hi", "ops", 3).await.expect("ok").is_none());
    assert!(store.retrieve_from("", "ops", 3).await.expect("ok").is_none());
    assert_eq!(harness.embedder.calls(), calls_before);
}

#[tokio::test]
async fn retrieve_from_unknown_collection_fails() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    let result = store.retrieve_from("restart nginx", "missing", 3).await;
    assert!(matches!(result, Err(KnowledgeError::CollectionNotFound(_))));
}

#[tokio::test]
async fn routed_retrieval_applies_threshold_and_limit() {
    let harness = Harness::new();
    let mut store = harness.in_memory().await;
    store.set_router(Arc::new(StaticRouter::new(Some("ops".to_string()))));
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");
    let document = Document::new(
        "mixed",
        "restart nginx now\nrotate logs daily\nreload nginx config\nsomething else",
        "linux",
    );
    store.upload(document, "ops").await.expect("upload");

    let hits = store
        .retrieve("how to restart nginx", 5)
        .await
        .expect("retrieve should succeed")
        .expect("query is long enough");
    let texts: Vec<&str> = hits.iter().map(|h| h.payload.text.as_str()).collect();
    assert_eq!(texts, vec!["restart nginx now", "reload nginx config"]);
    assert!(hits.iter().all(|h| h.score >= SCORE_THRESHOLD));
    assert!(hits.iter().all(|h| h.payload.title == "mixed"));

    let limited = store
        .retrieve("restart nginx", 1)
        .await
        .expect("retrieve should succeed")
        .expect("query is long enough");
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn persistent_store_round_trips_through_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new();
    {
        let store = harness
            .builder()
            .persistent(temp_dir.path())
            .build()
            .await
            .expect("store should build");
        assert!(!store.is_in_memory());

        store
            .create_collection(Collection::new(5, "ops").with_topic("oncall"))
            .await
            .expect("create should succeed");
        store
            .upload(runbook("restart", 3), "ops")
            .await
            .expect("upload should succeed");
    }

    let restarted = harness
        .builder()
        .persistent(temp_dir.path())
        .build()
        .await
        .expect("store should rebuild");

    let collection = restarted
        .get_collection("ops")
        .await
        .expect("collection restored");
    assert_eq!(collection.collection_id, 5);
    assert_eq!(collection.size, 3);
    assert_eq!(collection.documents.len(), 1);
    assert_eq!(collection.documents[0].name, "restart");
    assert!(collection.documents[0].content.is_empty());
    assert!(collection.topics.contains(&Topic::new("oncall")));
    assert!(collection.topics.contains(&Topic::new("linux")));
    assert_eq!(restarted.reconciliation_report().loaded, vec!["ops".to_string()]);
    assert_eq!(restarted.next_collection_id().await, 6);

    let receipt = restarted
        .upload(runbook("reload", 1), "ops")
        .await
        .expect("upload should succeed");
    assert_eq!(receipt.ids, 3..4);
}

#[tokio::test]
async fn titles_stay_unique_across_collections() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    for (id, title) in ["ops", "hr", "ops", "dev", "hr"].iter().enumerate() {
        store
            .create_collection(Collection::new(id as u64, *title))
            .await
            .expect("create should not fail");
    }

    let mut titles: Vec<String> = store.collections().await.into_keys().collect();
    titles.sort();
    assert_eq!(titles, vec!["dev", "hr", "ops"]);
    assert_eq!(
        harness.index.list_collections().await.expect("list").len(),
        3
    );
}

#[tokio::test]
async fn create_with_documents_runs_on_spawned_task() {
    let harness = Harness::new();
    let store = Arc::new(harness.in_memory().await);

    let spawned = Arc::clone(&store);
    let created = tokio::spawn(async move {
        spawned
            .create_collection(Collection::new(0, "ops").with_document(runbook("restart", 2)))
            .await
    })
    .await
    .expect("task")
    .expect("create should succeed");

    assert!(created);
    assert_eq!(store.get_collection("ops").await.expect("exists").size, 2);
}

#[tokio::test]
async fn timed_out_upload_is_rolled_back_after_it_lands() {
    let harness = Harness::with_index(RecordingIndex {
        upload_delay: Some(Duration::from_millis(150)),
        ..RecordingIndex::default()
    });
    let store = harness
        .builder()
        .settings(StoreSettings {
            call_timeout: Duration::from_millis(30),
            embedding_concurrency: 1,
        })
        .build()
        .await
        .expect("store should build");
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");

    let result = store.upload(runbook("slow", 3), "ops").await;

    assert!(matches!(result, Err(KnowledgeError::Timeout { .. })));
    assert_eq!(harness.index.uploaded_ids(), vec![vec![0, 1, 2]]);
    assert_eq!(harness.index.deleted_ids(), vec![vec![0, 1, 2]]);
    assert_eq!(harness.index.inner.count_points("ops").await.expect("count"), 0);
    let stored = store.get_collection("ops").await.expect("exists");
    assert_eq!(stored.size, 0);
    assert!(!stored.has_document("slow"));
}

#[tokio::test]
async fn repeated_create_in_persistent_mode_writes_once() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new();
    let store = harness
        .builder()
        .persistent(temp_dir.path())
        .build()
        .await
        .expect("store should build");

    assert!(
        store
            .create_collection(Collection::new(0, "ops"))
            .await
            .expect("create should succeed")
    );
    let path = temp_dir.path().join("ops.json");
    let written = std::fs::read_to_string(&path).expect("metadata written");
    let modified = std::fs::metadata(&path).and_then(|m| m.modified()).expect("mtime");

    assert!(
        !store
            .create_collection(Collection::new(4, "ops").with_topic("other"))
            .await
            .expect("second create should be a no-op")
    );

    let files: Vec<_> = std::fs::read_dir(temp_dir.path())
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from("ops.json")]);
    assert_eq!(std::fs::read_to_string(&path).expect("read"), written);
    assert_eq!(
        std::fs::metadata(&path).and_then(|m| m.modified()).expect("mtime"),
        modified
    );
}

#[tokio::test]
async fn existing_collection_is_untouched_by_duplicate_create() {
    let harness = Harness::new();
    let store = harness.in_memory().await;
    store
        .create_collection(
            Collection::new(0, "ops")
                .with_topic("oncall")
                .with_document(runbook("restart", 3)),
        )
        .await
        .expect("create should succeed");
    let before = store.get_collection("ops").await.expect("exists");
    let uploads_before = harness.index.upload_calls.load(Ordering::SeqCst);

    let created = store
        .create_collection(
            Collection::new(9, "ops")
                .with_topic("other")
                .with_document(runbook("reload", 2)),
        )
        .await
        .expect("duplicate create should not fail");

    assert!(!created);
    let after = store.get_collection("ops").await.expect("exists");
    assert_eq!(after.size, 3);
    assert_eq!(after.size, before.size);
    assert_eq!(after.documents, before.documents);
    assert_eq!(after.topics, before.topics);
    assert_eq!(after.collection_id, 0);
    assert_eq!(harness.index.upload_calls.load(Ordering::SeqCst), uploads_before);
}

#[tokio::test]
async fn two_documents_survive_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new();
    {
        let store = harness
            .builder()
            .persistent(temp_dir.path())
            .build()
            .await
            .expect("store should build");
        store
            .create_collection(
                Collection::new(0, "ops")
                    .with_document(Document::new("a", "restart nginx
check nginx", "t1"))
                    .with_document(Document::new("b", "rotate logs", "t2")),
            )
            .await
            .expect("create should succeed");
    }

    let restarted = harness
        .builder()
        .persistent(temp_dir.path())
        .build()
        .await
        .expect("store should rebuild");
    let collection = restarted.get_collection("ops").await.expect("restored");

    let documents: Vec<(&str, &str)> = collection
        .documents
        .iter()
        .map(|d| (d.name.as_str(), d.topic.name()))
        .collect();
    assert_eq!(documents, vec![("a", "t1"), ("b", "t2")]);
    assert_eq!(collection.size, 3);
    assert!(collection.topics.contains(&Topic::new("t1")));
    assert!(collection.topics.contains(&Topic::new("t2")));
}

#[tokio::test]
async fn creation_locks_are_released() {
    let harness = Harness::new();
    let store = harness.in_memory().await;

    let (first, second) = tokio::join!(
        store.create_collection(Collection::new(0, "ops")),
        store.create_collection(Collection::new(1, "ops")),
    );
    first.expect("first");
    second.expect("second");

    harness.index.reject_creates.store(true, Ordering::SeqCst);
    let rejected = store.create_collection(Collection::new(2, "dev")).await;
    assert!(matches!(rejected, Err(KnowledgeError::CollectionRejected(_))));

    assert!(store.creation_locks.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn chunks_are_embedded_in_batches_in_order() {
    let embedder = Arc::new(BatchingEmbedder {
        batches: std::sync::Mutex::new(Vec::new()),
    });
    let index = Arc::new(RecordingIndex::default());
    let store = KnowledgeStore::builder(embedder.clone(), index.clone())
        .chunker(Arc::new(LineChunker))
        .build()
        .await
        .expect("store should build");
    store
        .create_collection(Collection::new(0, "ops"))
        .await
        .expect("create should succeed");

    let receipt = store
        .upload(runbook("restart", 5), "ops")
        .await
        .expect("upload should succeed");

    assert_eq!(receipt.ids, 0..5);
    assert_eq!(*embedder.batches.lock().expect("lock"), vec![2, 2, 1]);
    assert_eq!(index.uploaded_ids(), vec![vec![0, 1, 2, 3, 4]]);
}
