use crate::{ChunkId, GenerationError, IndexEntry, IndexError, ScoredText};
use async_trait::async_trait;
use std::collections::HashSet;

/// Persisted store of embedded chunks.
///
/// Entries are only ever inserted; one `insert` call is one atomic write.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Ids of every stored entry, without fetching text or vectors.
    async fn list_ids(&self) -> Result<HashSet<ChunkId>, IndexError>;

    async fn insert(&self, batch: &[IndexEntry]) -> Result<(), IndexError>;

    /// Best matches first.
    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredText>, IndexError>;

    /// Drops every entry so the corpus can be re-indexed from scratch.
    async fn reset(&self) -> Result<(), IndexError>;
}

/// Hosted or local text generation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError>;
}
