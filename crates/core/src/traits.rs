use crate::models::{CollectionCheck, Distance, EmbeddingRecord, RetrievedChunk};
use crate::ServiceError;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Created,
    Existing,
}

/// A named collection of embedding records supporting top-k retrieval.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Creates the collection when absent. An existing collection is only
    /// compared against `dimensions`/`distance` under [`CollectionCheck::Validate`].
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: Distance,
        check: CollectionCheck,
    ) -> Result<CollectionState, ServiceError>;

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError>;

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>, ServiceError>;
}
