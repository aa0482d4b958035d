use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("file is not valid utf-8: {0}")]
    Encoding(String),

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failure of a single outbound call to the embedding service, the vector
/// store or the chat model.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{backend} returned {status}: {details}")]
    BackendResponse {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    InvalidResponse { backend: String, details: String },

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("collection {collection} mismatch: {details}")]
    CollectionMismatch { collection: String, details: String },
}

/// Stage-level error of the indexing and question-answering workflows. The
/// wrapped service text is kept verbatim in the message.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("embedding failed: {0}")]
    Embedding(#[source] ServiceError),

    #[error("vector store failed: {0}")]
    VectorStore(#[source] ServiceError),

    #[error("llm call failed: {0}")]
    Llm(#[source] ServiceError),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("question is empty")]
    EmptyQuestion,

    #[error("unknown job: {0}")]
    UnknownJob(Uuid),
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
