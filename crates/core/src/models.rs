use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

pub const COLLECTION_NAME: &str = "bank_documents";
pub const EMBEDDING_DIMENSIONS: usize = 768;
pub const EMBEDDING_MODEL: &str = "nomic-embed-text-v1.5";
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// One PDF page or one whole text file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source_path: String,
    /// 0-based page index; `None` for text files.
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: Uuid,
    pub text: String,
    pub source_path: String,
    pub page_number: Option<u32>,
}

/// A chunk together with its embedding, as written to the collection.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
    Manhattan,
}

impl Distance {
    pub fn as_qdrant(self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
            Self::Euclid => "Euclid",
            Self::Manhattan => "Manhattan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimensions: usize,
    pub distance: Distance,
}

impl Default for CollectionSpec {
    fn default() -> Self {
        Self {
            name: COLLECTION_NAME.to_string(),
            dimensions: EMBEDDING_DIMENSIONS,
            distance: Distance::Cosine,
        }
    }
}

/// What to do when the collection already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionCheck {
    /// Reuse whatever is there.
    #[default]
    Trust,
    /// Compare vector size and distance against the requested collection.
    Validate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub source_path: String,
    pub page_number: Option<u32>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub page: Option<u32>,
}

impl SourceRef {
    pub fn from_hit(hit: &RetrievedChunk) -> Self {
        let source = if hit.source_path.is_empty() {
            "Unknown".to_string()
        } else {
            Path::new(&hit.source_path)
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| hit.source_path.clone())
        };

        Self {
            source,
            page: hit.page_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub source_documents: Vec<RetrievedChunk>,
    pub asked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub files: usize,
    pub documents: usize,
    pub chunks: usize,
    pub skipped: usize,
}
