use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("no text could be extracted from {0}")]
    NoText(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("index was built with embedder `{stored}` but `{requested}` was supplied")]
    EmbedderMismatch { stored: String, requested: String },

    #[error("chunk from {source_name} page {page} has no identifier")]
    MissingChunkId { source_name: String, page: u32 },

    #[error("batch {batch} failed after {committed} chunks were committed: {source}")]
    BatchFailed {
        batch: usize,
        committed: usize,
        #[source]
        source: Box<IndexError>,
    },

    #[error("index request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Why a single question could not be answered.
///
/// Callers decide whether the detail reaches the end user, see
/// [`crate::query::ErrorExposure`].
#[derive(Debug, Error)]
pub enum QueryFailure {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("embedding the question failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("model endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("model returned no choices")]
    EmptyResponse,
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
