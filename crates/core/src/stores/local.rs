//! Directory-backed vector index.
//!
//! `manifest.json` records which embedder produced the vectors and
//! `entries.json` holds every entry. Each insert rewrites `entries.json`
//! through a temp file and rename, so a batch is either fully on disk or
//! not at all. Search is brute-force cosine similarity.

use crate::traits::VectorIndex;
use crate::{ChunkId, IndexEntry, IndexError, ScoredText};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Manifest {
    embedder: String,
    dimensions: usize,
}

pub struct LocalIndex {
    dir: PathBuf,
    entries: RwLock<Vec<IndexEntry>>,
}

impl LocalIndex {
    /// Opens (or creates) the index in `dir` for vectors from `embedder`.
    pub fn open(dir: &Path, embedder: &str, dimensions: usize) -> Result<Self, IndexError> {
        fs::create_dir_all(dir)?;

        let requested = Manifest {
            embedder: embedder.to_string(),
            dimensions,
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            let stored: Manifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;
            if stored != requested {
                return Err(IndexError::EmbedderMismatch {
                    stored: format!("{}/{}", stored.embedder, stored.dimensions),
                    requested: format!("{}/{}", requested.embedder, requested.dimensions),
                });
            }
        } else {
            write_atomically(dir, MANIFEST_FILE, &serde_json::to_vec_pretty(&requested)?)?;
        }

        let entries_path = dir.join(ENTRIES_FILE);
        let entries = if entries_path.exists() {
            serde_json::from_slice(&fs::read(&entries_path)?)?
        } else {
            Vec::new()
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    async fn list_ids(&self) -> Result<HashSet<ChunkId>, IndexError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().map(|entry| entry.id.clone()).collect())
    }

    async fn insert(&self, batch: &[IndexEntry]) -> Result<(), IndexError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.extend_from_slice(batch);
        write_atomically(&self.dir, ENTRIES_FILE, &serde_json::to_vec(&next)?)?;
        *entries = next;
        Ok(())
    }

    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredText>, IndexError> {
        let entries = self.entries.read().await;
        let mut scored = entries
            .iter()
            .map(|entry| ScoredText {
                id: entry.id.clone(),
                text: entry.text.clone(),
                score: cosine_sim(query_vector, &entry.vector),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let mut entries = self.entries.write().await;
        let path = self.dir.join(ENTRIES_FILE);
        if path.exists() {
            fs::remove_file(path)?;
        }
        entries.clear();
        Ok(())
    }
}

fn write_atomically(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), IndexError> {
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(dir.join(name))
        .map_err(|error| IndexError::Io(error.error))?;
    Ok(())
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: ChunkId::from(id.to_string()),
            text: format!("text of {id}"),
            vector,
        }
    }

    #[tokio::test]
    async fn entries_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let index = LocalIndex::open(dir.path(), "char-trigram-2", 2)?;
            index.insert(&[entry("a:0:0", vec![1.0, 0.0])]).await?;
        }

        let reopened = LocalIndex::open(dir.path(), "char-trigram-2", 2)?;
        let ids = reopened.list_ids().await?;
        assert!(ids.contains(&ChunkId::from("a:0:0".to_string())));
        assert_eq!(reopened.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn search_orders_by_cosine_similarity() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path(), "test", 2)?;
        index
            .insert(&[
                entry("far:0:0", vec![0.0, 1.0]),
                entry("near:0:0", vec![1.0, 0.1]),
                entry("mid:0:0", vec![1.0, 1.0]),
            ])
            .await?;

        let hits = index.similarity_search(&[1.0, 0.0], 2).await?;
        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["near:0:0", "mid:0:0"]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_returns_no_hits() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path(), "test", 2)?;
        assert!(index.similarity_search(&[1.0, 0.0], 5).await?.is_empty());
        Ok(())
    }

    #[test]
    fn different_embedder_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        LocalIndex::open(dir.path(), "e5-small-v2", 384)?;
        let reopened = LocalIndex::open(dir.path(), "char-trigram-128", 128);
        assert!(matches!(reopened, Err(IndexError::EmbedderMismatch { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn reset_removes_entries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path(), "test", 2)?;
        index.insert(&[entry("a:0:0", vec![1.0, 0.0])]).await?;
        index.reset().await?;
        assert!(index.is_empty().await);
        assert!(LocalIndex::open(dir.path(), "test", 2)?.list_ids().await?.is_empty());
        Ok(())
    }
}
