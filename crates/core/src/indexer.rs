use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{Chunk, ChunkId, IndexEntry, IndexError, IndexReport};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;

/// One async lock per source document, created on first use.
#[derive(Default)]
pub struct SourceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SourceLocks {
    fn lock_for(&self, source: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Locks every source in sorted order so concurrent callers cannot
    /// deadlock on overlapping source sets.
    pub async fn acquire<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a str>,
    ) -> Vec<OwnedMutexGuard<()>> {
        let ordered: BTreeSet<&str> = sources.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for source in ordered {
            guards.push(self.lock_for(source).lock_owned().await);
        }
        guards
    }

    /// Forgets locks nobody holds or waits on.
    pub fn prune(&self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of sources with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Inserts only chunks whose id is not yet in the index.
pub struct IncrementalIndexer {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    locks: SourceLocks,
}

impl IncrementalIndexer {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            batch_size: batch_size.max(1),
            locks: SourceLocks::default(),
        }
    }

    pub async fn upsert(&self, chunks: &[Chunk]) -> Result<IndexReport, IndexError> {
        for chunk in chunks {
            if chunk.id.is_none() {
                return Err(IndexError::MissingChunkId {
                    source_name: chunk.source.clone(),
                    page: chunk.page,
                });
            }
        }

        let guards = self
            .locks
            .acquire(chunks.iter().map(|chunk| chunk.source.as_str()))
            .await;
        let outcome = self.upsert_locked(chunks).await;
        drop(guards);
        self.locks.prune();
        outcome
    }

    async fn upsert_locked(&self, chunks: &[Chunk]) -> Result<IndexReport, IndexError> {
        let existing = self.index.list_ids().await?;
        info!(existing = existing.len(), "existing chunks in index");

        let mut seen: HashSet<&ChunkId> = HashSet::new();
        let new_chunks: Vec<&Chunk> = chunks
            .iter()
            .filter(|chunk| {
                chunk
                    .id
                    .as_ref()
                    .is_some_and(|id| !existing.contains(id) && seen.insert(id))
            })
            .collect();

        let mut report = IndexReport {
            existing: existing.len(),
            ..IndexReport::default()
        };

        if new_chunks.is_empty() {
            info!("no new chunks to add");
            return Ok(report);
        }

        info!(new = new_chunks.len(), "adding new chunks");
        for (position, batch) in new_chunks.chunks(self.batch_size).enumerate() {
            let batch_number = position + 1;
            let committed = report.added;
            self.insert_batch(batch)
                .await
                .map_err(|error| IndexError::BatchFailed {
                    batch: batch_number,
                    committed,
                    source: Box::new(error),
                })?;

            report.added += batch.len();
            report.batches.push(batch.len());
            info!(batch = batch_number, size = batch.len(), "added batch");
        }

        Ok(report)
    }

    async fn insert_batch(&self, batch: &[&Chunk]) -> Result<(), IndexError> {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let entries = batch
            .iter()
            .zip(vectors)
            .filter_map(|(chunk, vector)| {
                chunk.id.clone().map(|id| IndexEntry {
                    id,
                    text: chunk.text.clone(),
                    vector,
                })
            })
            .collect::<Vec<_>>();

        self.index.insert(&entries).await
    }
}
