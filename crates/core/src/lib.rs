pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod identifiers;
pub mod indexer;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod normalizer;
pub mod query;
pub mod questions;
pub mod stores;
pub mod stream;
pub mod traits;

pub use chunking::{Chunker, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{EmbedError, GenerationError, IndexError, IngestError, QueryFailure, Result};
pub use extractor::{
    Extraction, LayoutExtractor, LopdfExtractor, OcrEngine, OcrMyPdf, PageText, PdfExtractor,
    TextExtractor,
};
pub use identifiers::assign_chunk_ids;
pub use indexer::IncrementalIndexer;
pub use ingest::{
    chunk_text_corpus, chunk_text_file, digest_file, discover_pdf_files, DocumentProcessor,
    ProcessingReport, SkippedPdf,
};
pub use llm::{ChatCompletionsModel, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL};
pub use models::{
    Answer, Chunk, ChunkId, IndexEntry, IndexReport, IngestionOptions, ProcessedDocument,
    QueryOptions, QueryResult, ScoredText, NO_CONTEXT_ANSWER,
};
pub use normalizer::normalize;
pub use query::{ErrorExposure, QueryEngine};
pub use questions::{extract_questions_from_pdf, QuestionExtractor, TrailingQuestionMark};
pub use stores::{LocalIndex, QdrantStore};
pub use stream::QueryEvent;
pub use traits::{LanguageModel, VectorIndex};
