use crate::models::{CollectionCheck, Distance, EmbeddingRecord, RetrievedChunk};
use crate::traits::{CollectionState, VectorIndex};
use crate::ServiceError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    dimensions: Option<usize>,
    records: Vec<EmbeddingRecord>,
}

/// Process-local index with an exact cosine scan.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn cosine(left: &[f32], right: &[f32]) -> f64 {
    let dot: f64 = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let norm_left = left.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
    let norm_right = right.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();

    if norm_left == 0.0 || norm_right == 0.0 {
        0.0
    } else {
        dot / (norm_left * norm_right)
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: Distance,
        check: CollectionCheck,
    ) -> Result<CollectionState, ServiceError> {
        let mut inner = self.inner.write().await;
        match inner.dimensions {
            None => {
                inner.dimensions = Some(dimensions);
                Ok(CollectionState::Created)
            }
            Some(existing)
                if check == CollectionCheck::Validate
                    && (existing != dimensions || distance != Distance::Cosine) =>
            {
                Err(ServiceError::CollectionMismatch {
                    collection: "in-memory".to_string(),
                    details: format!(
                        "existing vectors are size {existing} / Cosine, requested {dimensions} / {}",
                        distance.as_qdrant()
                    ),
                })
            }
            Some(_) => Ok(CollectionState::Existing),
        }
    }

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError> {
        let mut inner = self.inner.write().await;
        for record in records {
            let expected = *inner.dimensions.get_or_insert(record.vector.len());
            if expected != record.vector.len() {
                return Err(ServiceError::DimensionMismatch {
                    expected,
                    got: record.vector.len(),
                });
            }
        }

        for record in records {
            let position = inner
                .records
                .iter()
                .position(|existing| existing.chunk.chunk_id == record.chunk.chunk_id);
            match position {
                Some(index) => inner.records[index] = record.clone(),
                None => inner.records.push(record.clone()),
            }
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>, ServiceError> {
        let inner = self.inner.read().await;
        if let Some(expected) = inner.dimensions {
            if expected != vector.len() {
                return Err(ServiceError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }

        let mut scored = inner
            .records
            .iter()
            .map(|record| (cosine(vector, &record.vector), record))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, record)| RetrievedChunk {
                chunk_id: record.chunk.chunk_id.to_string(),
                text: record.chunk.text.clone(),
                source_path: record.chunk.source_path.clone(),
                page_number: record.chunk.page_number,
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use uuid::Uuid;

    fn record(text: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk: Chunk {
                chunk_id: Uuid::new_v4(),
                text: text.to_string(),
                source_path: "/docs/a.txt".to_string(),
                page_number: None,
            },
            vector,
        }
    }

    #[tokio::test]
    async fn query_orders_by_cosine_similarity() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                record("east", vec![1.0, 0.0]),
                record("north", vec![0.0, 1.0]),
                record("north-east", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[0.0, 2.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "north");
        assert_eq!(hits[1].text, "north-east");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = InMemoryStore::new();
        assert!(store.query(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_mixed_dimensions() {
        let store = InMemoryStore::new();
        store.upsert(&[record("a", vec![1.0, 0.0])]).await.unwrap();
        let error = store.upsert(&[record("b", vec![1.0])]).await.unwrap_err();
        assert!(matches!(error, ServiceError::DimensionMismatch { expected: 2, got: 1 }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent_and_optionally_strict() {
        let store = InMemoryStore::new();
        let first = store
            .ensure_collection(768, Distance::Cosine, CollectionCheck::Trust)
            .await
            .unwrap();
        let second = store
            .ensure_collection(384, Distance::Cosine, CollectionCheck::Trust)
            .await
            .unwrap();
        assert_eq!(first, CollectionState::Created);
        assert_eq!(second, CollectionState::Existing);

        let strict = store
            .ensure_collection(384, Distance::Cosine, CollectionCheck::Validate)
            .await;
        assert!(strict.is_err());
    }
}
