use crate::chunking::{split_documents, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::loader::{load_documents, SkippedFile};
use crate::models::{Chunk, CollectionCheck, CollectionSpec, EmbeddingRecord, IndexSummary};
use crate::traits::VectorIndex;
use crate::{RagError, ServiceError};
use std::path::PathBuf;
use tracing::{info, warn};

/// Embeds chunks and writes them to a vector index.
#[derive(Clone)]
pub struct Indexer<E, V> {
    embedder: E,
    store: V,
}

impl<E, V> Indexer<E, V>
where
    E: Embedder,
    V: VectorIndex,
{
    pub fn new(embedder: E, store: V) -> Self {
        Self { embedder, store }
    }

    /// Fails the whole batch on the first embedding or write error.
    pub async fn index(&self, chunks: &[Chunk]) -> Result<usize, RagError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        info!(chunk_count = texts.len(), "generating embeddings");
        let vectors = self
            .embedder
            .embed_documents(&texts)
            .await
            .map_err(RagError::Embedding)?;

        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(ServiceError::InvalidResponse {
                backend: "embedder".to_string(),
                details: format!(
                    "embedding count {} doesn't match chunk count {}",
                    vectors.len(),
                    chunks.len()
                ),
            }));
        }

        let records = chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord { chunk, vector })
            .collect::<Vec<_>>();

        info!(record_count = records.len(), "uploading to vector store");
        self.store
            .upsert(&records)
            .await
            .map_err(RagError::VectorStore)?;

        Ok(records.len())
    }
}

#[derive(Debug)]
pub enum IndexOutcome {
    /// No document could be loaded; the vector store was not contacted.
    NothingLoaded { skipped: Vec<SkippedFile> },
    Indexed {
        summary: IndexSummary,
        skipped: Vec<SkippedFile>,
    },
}

impl IndexOutcome {
    pub fn summary(&self) -> IndexSummary {
        match self {
            Self::NothingLoaded { skipped } => IndexSummary {
                files: 0,
                documents: 0,
                chunks: 0,
                skipped: skipped.len(),
            },
            Self::Indexed { summary, .. } => summary.clone(),
        }
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        match self {
            Self::NothingLoaded { skipped } | Self::Indexed { skipped, .. } => skipped,
        }
    }
}

/// Loader, chunker and indexer wired together. Every entry point (folder,
/// explicit files, picker, upload) goes through [`IndexingPipeline::run`].
#[derive(Clone)]
pub struct IndexingPipeline<E, V> {
    indexer: Indexer<E, V>,
    store: V,
    chunking: ChunkingConfig,
    collection: CollectionSpec,
    check: CollectionCheck,
}

impl<E, V> IndexingPipeline<E, V>
where
    E: Embedder,
    V: VectorIndex + Clone,
{
    pub fn new(embedder: E, store: V) -> Self {
        Self {
            indexer: Indexer::new(embedder, store.clone()),
            store,
            chunking: ChunkingConfig::default(),
            collection: CollectionSpec::default(),
            check: CollectionCheck::default(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_collection(mut self, collection: CollectionSpec, check: CollectionCheck) -> Self {
        self.collection = collection;
        self.check = check;
        self
    }

    pub async fn run(&self, paths: Vec<PathBuf>) -> Result<IndexOutcome, RagError> {
        let files = paths.len();
        let report = tokio::task::spawn_blocking(move || load_documents(&paths))
            .await
            .map_err(|error| RagError::Task(format!("document loading: {error}")))?;

        for skipped in &report.skipped {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
        }

        if report.documents.is_empty() {
            info!(files, "no documents were loaded");
            return Ok(IndexOutcome::NothingLoaded {
                skipped: report.skipped,
            });
        }

        let documents = report.documents.len();
        let chunks = split_documents(&report.documents, &self.chunking)?;
        info!(documents, chunk_count = chunks.len(), "chunked documents");

        self.store
            .ensure_collection(self.collection.dimensions, self.collection.distance, self.check)
            .await
            .map_err(RagError::VectorStore)?;

        let written = self.indexer.index(&chunks).await?;
        info!(collection = %self.collection.name, written, "indexed chunks");

        Ok(IndexOutcome::Indexed {
            summary: IndexSummary {
                files,
                documents,
                chunks: written,
                skipped: report.skipped.len(),
            },
            skipped: report.skipped,
        })
    }
}
