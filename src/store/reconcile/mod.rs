// Startup reconciliation
// Local metadata is kept only where the vector index still has the collection


use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::with_timeout;
use crate::Result;
use crate::metadata::{METADATA_EXTENSION, MetadataStore};
use crate::models::Collection;
use crate::vector_index::VectorIndex;

/// Outcome of matching metadata files against the remote collection list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Collections restored into the store, sorted by title
    pub loaded: Vec<String>,
    /// Metadata entries deleted because they were stale or unreadable
    pub pruned_local: Vec<PathBuf>,
    /// Stale entries that could not be deleted; skipped like pruned ones
    pub unremovable_local: Vec<PathBuf>,
    /// Remote collections with no usable metadata; left untouched
    pub orphaned_remote: Vec<String>,
}

impl ReconciliationReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.pruned_local.is_empty()
            && self.unremovable_local.is_empty()
            && self.orphaned_remote.is_empty()
    }
}

pub struct Reconciler<'a> {
    index: &'a dyn VectorIndex,
    metadata: &'a MetadataStore,
    call_timeout: Duration,
}

impl<'a> Reconciler<'a> {
    #[inline]
    pub fn new(index: &'a dyn VectorIndex, metadata: &'a MetadataStore, call_timeout: Duration) -> Self {
        Self {
            index,
            metadata,
            call_timeout,
        }
    }

    /// Build the collection mapping from the metadata directory.
    ///
    /// Stale or malformed entries are deleted. Each surviving collection gets its
    /// `size` from the remote point count so id allocation resumes where it stopped.
    #[inline]
    pub async fn run(&self) -> Result<(HashMap<String, Collection>, ReconciliationReport)> {
        info!("Reconciling metadata in {}", self.metadata.dir().display());
        self.metadata.ensure_dir().await?;

        let remote: BTreeSet<String> = with_timeout(
            "list collections",
            self.call_timeout,
            self.index.list_collections(),
        )
        .await?
        .into_iter()
        .collect();
        debug!("Vector index reports {} collections", remote.len());

        let mut report = ReconciliationReport::default();
        let mut collections = HashMap::new();

        for path in self.metadata.entries().await? {
            let Some(mut collection) = self.load_matching(&path, &remote).await else {
                match self.metadata.remove(&path).await {
                    Ok(()) => report.pruned_local.push(path),
                    Err(e) => {
                        warn!("Could not delete stale metadata {}: {}", path.display(), e);
                        report.unremovable_local.push(path);
                    }
                }
                continue;
            };

            collection.size = with_timeout(
                "count points",
                self.call_timeout,
                self.index.count_points(&collection.title),
            )
            .await?;
            debug!(
                "Collection {}: restored with {} documents and {} points",
                collection.title,
                collection.documents.len(),
                collection.size
            );
            report.loaded.push(collection.title.clone());
            collections.insert(collection.title.clone(), collection);
        }

        report.loaded.sort();
        report.orphaned_remote = remote
            .into_iter()
            .filter(|name| !collections.contains_key(name))
            .collect();

        for name in &report.orphaned_remote {
            warn!(
                "Remote collection {} has no local metadata and is not exposed; clean it up manually",
                name
            );
        }
        info!(
            "Reconciliation loaded {} collections, pruned {} stale entries, found {} orphaned remote collections",
            report.loaded.len(),
            report.pruned_local.len(),
            report.orphaned_remote.len()
        );

        Ok((collections, report))
    }

    /// `None` means the entry is stale and should be deleted
    async fn load_matching(&self, path: &Path, remote: &BTreeSet<String>) -> Option<Collection> {
        if path.extension().and_then(|e| e.to_str()) != Some(METADATA_EXTENSION) {
            warn!("Pruning non-metadata entry {}", path.display());
            return None;
        }

        let stem = path.file_stem().and_then(|s| s.to_str())?;
        if !remote.contains(stem) {
            warn!(
                "Pruning metadata for {}: collection no longer exists in the vector index",
                stem
            );
            return None;
        }

        match self.metadata.load(path).await {
            Ok(record) if record.title == stem => Some(record.into_collection()),
            Ok(record) => {
                warn!(
                    "Pruning {}: record title {} does not match its file name",
                    path.display(),
                    record.title
                );
                None
            }
            Err(e) => {
                warn!("Pruning unreadable metadata {}: {}", path.display(), e);
                None
            }
        }
    }
}
