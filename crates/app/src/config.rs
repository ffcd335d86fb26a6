use anyhow::Context;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use textbook_rag_core::{
    CharacterNgramEmbedder, ChatCompletionsModel, Chunker, ChunkingConfig, DocumentProcessor,
    Embedder, ErrorExposure, HttpEmbedder, IncrementalIndexer, IngestionOptions, LayoutExtractor,
    LocalIndex, LopdfExtractor, OcrMyPdf, QdrantStore, QueryEngine, QueryOptions,
    QuestionExtractor, TextExtractor, TrailingQuestionMark, VectorIndex,
    DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_DIMENSIONS,
};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexBackend {
    Local,
    Qdrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Offline hashed character trigrams.
    CharTrigram,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

/// Settings shared by every subcommand. Each flag can also come from the
/// environment.
#[derive(Debug, Clone, Args)]
pub struct AppConfig {
    /// Folder where uploaded textbooks are kept.
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads", global = true)]
    pub upload_dir: PathBuf,

    /// Folder of processed `<name>.txt` files.
    #[arg(long, env = "DATA_DIR", default_value = "data", global = true)]
    pub data_dir: PathBuf,

    #[arg(long, env = "INDEX_BACKEND", value_enum, default_value = "local", global = true)]
    pub index_backend: IndexBackend,

    /// Directory of the local vector index.
    #[arg(long, env = "INDEX_DIR", default_value = "index", global = true)]
    pub index_dir: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    pub qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "textbook_chunks", global = true)]
    pub qdrant_collection: String,

    #[arg(long, env = "EMBEDDER", value_enum, default_value = "char-trigram", global = true)]
    pub embedder: EmbedderKind,

    #[arg(long, env = "EMBEDDING_URL", default_value = "http://localhost:11434/v1", global = true)]
    pub embedding_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text", global = true)]
    pub embedding_model: String,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true, global = true)]
    pub embedding_api_key: Option<String>,

    #[arg(
        long,
        env = "EMBEDDING_DIMENSIONS",
        default_value_t = DEFAULT_EMBEDDING_DIMENSIONS,
        global = true
    )]
    pub embedding_dimensions: usize,

    /// OpenAI-compatible chat completions base URL.
    #[arg(long, env = "LLM_BASE_URL", default_value = DEFAULT_CHAT_BASE_URL, global = true)]
    pub llm_base_url: String,

    #[arg(long, env = "LLM_MODEL", default_value = DEFAULT_CHAT_MODEL, global = true)]
    pub llm_model: String,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true, global = true)]
    pub llm_api_key: Option<String>,

    /// `ocrmypdf` executable used for scanned pages.
    #[arg(long, env = "OCR_PROGRAM", default_value = "ocrmypdf", global = true)]
    pub ocr_program: String,

    /// Return failure details to clients instead of a generic message.
    #[arg(long, env = "EXPOSE_ERRORS", default_value_t = false, global = true)]
    pub expose_errors: bool,

    /// Pause between streamed progress messages.
    #[arg(long, env = "STREAM_DELAY_MS", default_value_t = 500, global = true)]
    pub stream_delay_ms: u64,
}

impl AppConfig {
    pub fn exposure(&self) -> ErrorExposure {
        if self.expose_errors {
            ErrorExposure::Verbatim
        } else {
            ErrorExposure::Generic
        }
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            stream_delay: Duration::from_millis(self.stream_delay_ms),
            ..QueryOptions::default()
        }
    }
}

/// Every long-lived component, built once in `main` and handed to the
/// commands and HTTP handlers.
pub struct AppContext {
    pub config: AppConfig,
    pub processor: DocumentProcessor,
    pub chunker: Chunker,
    pub index: Arc<dyn VectorIndex>,
    pub indexer: IncrementalIndexer,
    pub engine: QueryEngine,
    pub questions: Arc<dyn QuestionExtractor>,
}

impl AppContext {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let options = IngestionOptions::default();

        let extractor = TextExtractor::new(
            Box::new(LopdfExtractor),
            Box::new(LayoutExtractor),
            Box::new(OcrMyPdf {
                program: config.ocr_program.clone(),
            }),
            options.ocr_threshold,
        );
        let processor = DocumentProcessor::new(extractor, config.data_dir.clone());

        let embedder: Arc<dyn Embedder> = match config.embedder {
            EmbedderKind::CharTrigram => Arc::new(CharacterNgramEmbedder {
                dimensions: config.embedding_dimensions,
            }),
            EmbedderKind::Http => Arc::new(HttpEmbedder::new(
                &config.embedding_url,
                config.embedding_model.clone(),
                config.embedding_api_key.clone(),
                config.embedding_dimensions,
            )?),
        };

        let index: Arc<dyn VectorIndex> = match config.index_backend {
            IndexBackend::Local => Arc::new(
                LocalIndex::open(&config.index_dir, &embedder.model_id(), embedder.dimensions())
                    .with_context(|| format!("opening index at {}", config.index_dir.display()))?,
            ),
            IndexBackend::Qdrant => {
                let store = QdrantStore::new(
                    &config.qdrant_url,
                    config.qdrant_collection.clone(),
                    embedder.dimensions(),
                )?;
                store
                    .ensure_collection()
                    .await
                    .context("preparing qdrant collection")?;
                Arc::new(store)
            }
        };
        info!(backend = ?config.index_backend, embedder = %embedder.model_id(), "index ready");

        let model = Arc::new(ChatCompletionsModel::new(
            &config.llm_base_url,
            config.llm_model.clone(),
            config.llm_api_key.clone(),
        )?);

        let indexer = IncrementalIndexer::new(index.clone(), embedder.clone(), options.batch_size);
        let engine = QueryEngine::new(index.clone(), embedder, model, config.query_options());

        Ok(Self {
            processor,
            chunker: Chunker::new(ChunkingConfig::from(&options)),
            index,
            indexer,
            engine,
            questions: Arc::new(TrailingQuestionMark::new()?),
            config,
        })
    }
}
