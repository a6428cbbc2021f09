use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("no documents found in {0}")]
    EmptyCorpus(String),

    #[error("rebuilt context is empty; refusing to train an empty synonym model")]
    EmptyContext,

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("invalid synonym model file: {0}")]
    ModelFormat(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    Store(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("knowledge base not ready: {0}")]
    NotReady(String),
}

impl SearchError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, SearchError::NotReady(_))
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from embedding service: {0}")]
    BackendResponse(String),

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
