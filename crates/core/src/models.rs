use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Answer returned when retrieval finds nothing to ground the model on.
pub const NO_CONTEXT_ANSWER: &str = "No relevant context found.";

/// Stable identifier of a chunk: `{source}:{page}:{sequence}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new(source: &str, page: u32, sequence: u64) -> Self {
        Self(format!("{source}:{page}:{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChunkId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Option<ChunkId>,
    pub source: String,
    pub page: u32,
    pub text: String,
}

impl Chunk {
    pub fn new(source: impl Into<String>, page: u32, text: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            page,
            text: text.into(),
        }
    }
}

/// A chunk as persisted inside a vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: ChunkId,
    pub text: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredText {
    pub id: ChunkId,
    pub text: String,
    pub score: f32,
}

/// Outcome of one ingestion run against the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub existing: usize,
    pub added: usize,
    pub batches: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub source_name: String,
    pub text_path: PathBuf,
    pub checksum: String,
    pub char_count: usize,
    pub ocr_applied: bool,
    pub processed_at: DateTime<Utc>,
}

/// Successful result of answering a single question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Generated(String),
    NoContext,
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Answer::Generated(text) => text,
            Answer::NoContext => NO_CONTEXT_ANSWER,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Answer::Generated(text) => text,
            Answer::NoContext => NO_CONTEXT_ANSWER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub ocr_threshold: usize,
    pub batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 800,
            chunk_overlap_chars: 200,
            ocr_threshold: 1_000,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_k: usize,
    pub max_questions: usize,
    pub temperature: f32,
    pub stream_delay: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_questions: 20,
            temperature: 0.0,
            stream_delay: Duration::from_millis(500),
        }
    }
}
