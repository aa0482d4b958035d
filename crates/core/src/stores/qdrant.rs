use crate::models::{CollectionCheck, Distance, EmbeddingRecord, RetrievedChunk};
use crate::traits::{CollectionState, VectorIndex};
use crate::ServiceError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
const UPSERT_BATCH_SIZE: usize = 64;

/// Qdrant over its REST API. Points use the `page_content` + `metadata`
/// payload layout.
#[derive(Clone)]
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    api_key: Option<String>,
    client: Client,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("endpoint", &self.endpoint)
            .field("collection", &self.collection)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            api_key: None,
            client: Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn checked(response: Response) -> Result<Value, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: "qdrant".to_string(),
                status: status.as_u16(),
                details: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    fn validate_existing(
        &self,
        info: &Value,
        dimensions: usize,
        distance: Distance,
    ) -> Result<(), ServiceError> {
        let vectors = info
            .pointer("/result/config/params/vectors")
            .ok_or_else(|| ServiceError::InvalidResponse {
                backend: "qdrant".to_string(),
                details: "collection info has no vector params".to_string(),
            })?;

        let size = vectors.pointer("/size").and_then(Value::as_u64);
        let metric = vectors.pointer("/distance").and_then(Value::as_str);

        match (size, metric) {
            (Some(size), Some(metric))
                if size as usize == dimensions && metric == distance.as_qdrant() =>
            {
                Ok(())
            }
            (Some(size), Some(metric)) => Err(ServiceError::CollectionMismatch {
                collection: self.collection.clone(),
                details: format!(
                    "existing vectors are size {size} / {metric}, requested {dimensions} / {}",
                    distance.as_qdrant()
                ),
            }),
            _ => Err(ServiceError::CollectionMismatch {
                collection: self.collection.clone(),
                details: "existing collection uses named vectors".to_string(),
            }),
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: Distance,
        check: CollectionCheck,
    ) -> Result<CollectionState, ServiceError> {
        let response = self
            .authorized(self.client.get(self.collection_url()))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            info!(collection = %self.collection, dimensions, "creating collection");
            let response = self
                .authorized(self.client.put(self.collection_url()))
                .json(&json!({
                    "vectors": {
                        "size": dimensions,
                        "distance": distance.as_qdrant(),
                    }
                }))
                .send()
                .await?;
            Self::checked(response).await?;
            return Ok(CollectionState::Created);
        }

        let info = Self::checked(response).await?;
        info!(collection = %self.collection, "collection already exists");

        if check == CollectionCheck::Validate {
            self.validate_existing(&info, dimensions, distance)?;
        }

        Ok(CollectionState::Existing)
    }

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError> {
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let points = batch
                .iter()
                .map(|record| {
                    json!({
                        "id": record.chunk.chunk_id.to_string(),
                        "vector": record.vector,
                        "payload": {
                            "page_content": record.chunk.text,
                            "metadata": {
                                "source": record.chunk.source_path,
                                "page": record.chunk.page_number,
                                "chunk_id": record.chunk.chunk_id.to_string(),
                            },
                        },
                    })
                })
                .collect::<Vec<_>>();

            debug!(collection = %self.collection, points = points.len(), "upserting batch");
            let response = self
                .authorized(
                    self.client
                        .put(format!("{}/points?wait=true", self.collection_url())),
                )
                .json(&json!({ "points": points }))
                .send()
                .await?;
            Self::checked(response).await?;
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>, ServiceError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .authorized(
                self.client
                    .post(format!("{}/points/search", self.collection_url())),
            )
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        let parsed = Self::checked(response).await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits.iter().map(hit_to_chunk).collect())
    }
}

fn hit_to_chunk(hit: &Value) -> RetrievedChunk {
    let id = match hit.pointer("/id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    };
    let chunk_id = hit
        .pointer("/payload/metadata/chunk_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(id);
    let source_path = hit
        .pointer("/payload/metadata/source")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let page_number = hit
        .pointer("/payload/metadata/page")
        .and_then(Value::as_i64)
        .and_then(|page| u32::try_from(page).ok());
    let text = hit
        .pointer("/payload/page_content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

    RetrievedChunk {
        chunk_id,
        text,
        source_path,
        page_number,
        score,
    }
}
