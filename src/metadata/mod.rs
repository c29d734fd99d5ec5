// Metadata store
// One JSON record per collection under `<base>/knowledge`


use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{Collection, Document, Topic};
use crate::{KnowledgeError, Result};

pub const METADATA_EXTENSION: &str = "json";

/// On-disk form of a collection. Document content is never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: u64,
    pub title: String,
    pub documents: Vec<DocumentRecord>,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub name: String,
    #[serde(default)]
    pub content: String,
    pub topic: String,
}

impl From<&Collection> for CollectionRecord {
    fn from(collection: &Collection) -> Self {
        Self {
            id: collection.collection_id,
            title: collection.title.clone(),
            documents: collection
                .documents
                .iter()
                .map(|document| DocumentRecord {
                    name: document.name.clone(),
                    content: String::new(),
                    topic: document.topic.name().to_string(),
                })
                .collect(),
            topics: collection
                .topics
                .iter()
                .map(|topic| topic.name().to_string())
                .collect(),
        }
    }
}

impl CollectionRecord {
    /// Rebuild the collection; `size` is not persisted and starts at zero
    #[inline]
    pub fn into_collection(self) -> Collection {
        let mut collection = Collection::new(self.id, self.title);
        collection.topics = self.topics.into_iter().map(Topic::from).collect();
        collection.documents = self
            .documents
            .into_iter()
            .map(|record| Document::new(record.name, record.content, record.topic))
            .collect();
        collection
    }
}

/// File-backed metadata directory
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    #[inline]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn path_for(&self, title: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", title, METADATA_EXTENSION))
    }

    #[inline]
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            KnowledgeError::Metadata(format!(
                "Failed to create metadata directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }

    /// Every directory entry, whatever its name or type
    #[inline]
    pub async fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut reader = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            KnowledgeError::Metadata(format!(
                "Failed to read metadata directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    #[inline]
    pub async fn load(&self, path: &Path) -> Result<CollectionRecord> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            KnowledgeError::Metadata(format!("Malformed record {}: {}", path.display(), e))
        })
    }

    /// Write the record through a temporary file and rename it into place
    #[inline]
    pub async fn save(&self, collection: &Collection) -> Result<PathBuf> {
        self.ensure_dir().await?;

        let record = CollectionRecord::from(collection);
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| KnowledgeError::Metadata(format!("Failed to serialize record: {}", e)))?;

        let path = self.path_for(&collection.title);
        let tmp_path = path.with_extension(format!("{}.tmp", METADATA_EXTENSION));
        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            KnowledgeError::Metadata(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            KnowledgeError::Metadata(format!("Failed to replace {}: {}", path.display(), e))
        })?;

        debug!("Collection {}: saved to {}", collection.title, path.display());
        Ok(path)
    }

    /// Delete an entry without following symlinks; an entry that is already
    /// gone counts as removed
    #[inline]
    pub async fn remove(&self, path: &Path) -> Result<()> {
        let removed = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => info!("Removed stale metadata entry {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Metadata entry {} already gone", path.display());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
