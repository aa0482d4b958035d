pub mod chunking;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod jobs;
pub mod llm;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod stores;
pub mod traits;

pub use chunking::{split_documents, split_text, ChunkingConfig, DEFAULT_SEPARATORS};
pub use config::{Mode, Settings};
pub use conversation::{ConversationEngine, ConversationOptions, NOT_FOUND_SENTINEL};
pub use embeddings::{CharacterNgramEmbedder, Embedder, NomicEmbedder};
pub use error::{IngestError, RagError, ServiceError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use jobs::{JobId, JobRegistry, JobState, JobStatus};
pub use llm::{ChatMessage, ChatModel, OpenAiChatModel, Role};
pub use loader::{discover_files, load_documents, load_folder, FileKind, LoadReport, SkippedFile};
pub use models::{
    Answer, Chunk, CollectionCheck, CollectionSpec, ConversationTurn, Distance, Document,
    EmbeddingRecord, IndexSummary, RetrievedChunk, SourceRef, COLLECTION_NAME,
    EMBEDDING_DIMENSIONS,
};
pub use pipeline::{IndexOutcome, Indexer, IndexingPipeline};
pub use session::{ConversationHistory, SessionStore, DEFAULT_SESSION};
pub use stores::{InMemoryStore, QdrantStore};
pub use traits::{CollectionState, VectorIndex};
