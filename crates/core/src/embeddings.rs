use crate::error::ServiceError;
use crate::models::{EMBEDDING_DIMENSIONS, EMBEDDING_MODEL};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const NOMIC_BASE_URL: &str = "https://api-atlas.nomic.ai/v1";
const NOMIC_BATCH_SIZE: usize = 64;

/// Text to fixed-length vector. Documents and questions must go through the
/// same implementation, otherwise similarity scores are meaningless.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum TaskType {
    SearchDocument,
    SearchQuery,
}

#[derive(Debug, Serialize)]
struct NomicRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    task_type: TaskType,
    dimensionality: usize,
}

#[derive(Debug, Deserialize)]
struct NomicResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for the hosted Nomic text embedding endpoint.
#[derive(Clone)]
pub struct NomicEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl std::fmt::Debug for NomicEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NomicEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl NomicEmbedder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: NOMIC_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: EMBEDDING_MODEL.to_string(),
            dimensions: EMBEDDING_DIMENSIONS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        task_type: TaskType,
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        let url = format!("{}/embedding/text", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&NomicRequest {
                model: &self.model,
                texts,
                task_type,
                dimensionality: self.dimensions,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: "nomic".to_string(),
                status: status.as_u16(),
                details: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: NomicResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(ServiceError::InvalidResponse {
                backend: "nomic".to_string(),
                details: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.embeddings.len()
                ),
            });
        }

        for vector in &parsed.embeddings {
            if vector.len() != self.dimensions {
                return Err(ServiceError::DimensionMismatch {
                    expected: self.dimensions,
                    got: vector.len(),
                });
            }
        }

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for NomicEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(NOMIC_BATCH_SIZE) {
            debug!(batch_size = batch.len(), "embedding document batch");
            vectors.extend(self.embed_batch(batch, TaskType::SearchDocument).await?);
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts, TaskType::SearchQuery).await?;
        vectors.pop().ok_or_else(|| ServiceError::InvalidResponse {
            backend: "nomic".to_string(),
            details: "empty embedding list".to_string(),
        })
    }
}

/// Deterministic local embedder: hashed character trigrams, L2-normalized.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(self.embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Overdraft limit and fees");
        let second = embedder.embed("Overdraft limit and fees");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").len(), 32);
        assert_eq!(CharacterNgramEmbedder::default().embed("abc").len(), 768);
    }

    #[tokio::test]
    async fn nomic_query_uses_search_query_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embedding/text"))
            .and(header("authorization", "Bearer nomic-key"))
            .and(body_partial_json(json!({
                "model": "nomic-embed-text-v1.5",
                "task_type": "search_query",
                "texts": ["what is the fee?"],
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.5, 0.5]] })),
            )
            .mount(&server)
            .await;

        let embedder = NomicEmbedder::new("nomic-key")
            .with_base_url(server.uri())
            .with_model("nomic-embed-text-v1.5", 2);
        let vector = embedder.embed_query("what is the fee?").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn nomic_documents_are_batched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embedding/text"))
            .and(body_partial_json(json!({ "task_type": "search_document" })))
            .respond_with(move |request: &wiremock::Request| {
                let body: serde_json::Value =
                    serde_json::from_slice(&request.body).unwrap_or_default();
                let count = body["texts"].as_array().map(Vec::len).unwrap_or(0);
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "embeddings": vec![vec![1.0, 0.0]; count] }))
            })
            .expect(2)
            .mount(&server)
            .await;

        let embedder = NomicEmbedder::new("k")
            .with_base_url(server.uri())
            .with_model("nomic-embed-text-v1.5", 2);
        let texts: Vec<String> = (0..70).map(|index| format!("chunk {index}")).collect();
        let vectors = embedder.embed_documents(&texts).await.unwrap();
        assert_eq!(vectors.len(), 70);
    }

    #[tokio::test]
    async fn nomic_rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embedding/text"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.1, 0.2, 0.3]] })),
            )
            .mount(&server)
            .await;

        let embedder = NomicEmbedder::new("k").with_base_url(server.uri());
        let error = embedder.embed_query("q").await.unwrap_err();
        assert!(matches!(
            error,
            ServiceError::DimensionMismatch {
                expected: 768,
                got: 3
            }
        ));
    }

    #[tokio::test]
    async fn nomic_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embedding/text"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let embedder = NomicEmbedder::new("bad").with_base_url(server.uri());
        let error = embedder.embed_query("q").await.unwrap_err();
        let message = error.to_string();
        assert!(message.contains("401"));
        assert!(message.contains("invalid api key"));
    }
}
