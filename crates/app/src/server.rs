use axum::{
    extract::{rejection::JsonRejection, Multipart, Path as UrlPath, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docqa_core::{
    ChatModel, ConversationEngine, Embedder, IndexingPipeline, JobId, JobRegistry, RagError,
    VectorIndex, DEFAULT_SESSION,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

const INDEX_PAGE: &str = include_str!("../static/index.html");

/// Everything the handlers share. Conversations are keyed by session id
/// inside the engine; uploads become jobs in the registry.
pub struct AppState<E, V, L> {
    pub engine: ConversationEngine<E, V, L>,
    pub pipeline: IndexingPipeline<E, V>,
    pub jobs: JobRegistry,
    pub upload_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClearRequest {
    #[serde(default)]
    session_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn session_or_default(session_id: Option<String>) -> String {
    session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION.to_string())
}

pub fn router<E, V, L>(state: Arc<AppState<E, V, L>>) -> Router
where
    E: Embedder + Clone + 'static,
    V: VectorIndex + Clone + 'static,
    L: ChatModel + 'static,
{
    Router::new()
        .route("/", get(index_page))
        .route("/api/ask", post(ask::<E, V, L>))
        .route("/api/clear", post(clear::<E, V, L>))
        .route("/api/upload", post(upload::<E, V, L>))
        .route("/api/jobs/:id", get(job_status::<E, V, L>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve<E, V, L>(state: Arc<AppState<E, V, L>>, addr: SocketAddr) -> anyhow::Result<()>
where
    E: Embedder + Clone + 'static,
    V: VectorIndex + Clone + 'static,
    L: ChatModel + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn ask<E, V, L>(
    State(state): State<Arc<AppState<E, V, L>>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Response
where
    E: Embedder + Clone + 'static,
    V: VectorIndex + Clone + 'static,
    L: ChatModel + 'static,
{
    let Ok(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Question is required");
    };
    let question = request.question.unwrap_or_default();
    let question = question.trim();
    if question.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Question is required");
    }

    let session_id = session_or_default(request.session_id);
    match state.engine.ask(&session_id, question).await {
        Ok(answer) => Json(answer).into_response(),
        Err(RagError::EmptyQuestion) => {
            error_response(StatusCode::BAD_REQUEST, "Question is required")
        }
        Err(error) => {
            warn!(session = %session_id, %error, "ask failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

async fn clear<E, V, L>(
    State(state): State<Arc<AppState<E, V, L>>>,
    payload: Result<Json<ClearRequest>, JsonRejection>,
) -> Json<serde_json::Value>
where
    E: Embedder + Clone + 'static,
    V: VectorIndex + Clone + 'static,
    L: ChatModel + 'static,
{
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    state
        .engine
        .clear(&session_or_default(request.session_id))
        .await;
    Json(json!({ "message": "Conversation cleared successfully" }))
}

/// Keeps only the final path component so uploads can't escape the upload
/// directory.
fn sanitize_file_name(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

async fn upload<E, V, L>(
    State(state): State<Arc<AppState<E, V, L>>>,
    mut multipart: Multipart,
) -> Response
where
    E: Embedder + Clone + 'static,
    V: VectorIndex + Clone + 'static,
    L: ChatModel + 'static,
{
    if let Err(error) = tokio::fs::create_dir_all(&state.upload_dir).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
    }

    let mut saved = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => return error_response(StatusCode::BAD_REQUEST, error.body_text()),
        };
        if field.name() != Some("files") {
            continue;
        }
        let Some(file_name) = field.file_name().and_then(sanitize_file_name) else {
            continue;
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => return error_response(StatusCode::BAD_REQUEST, error.body_text()),
        };

        let target = state.upload_dir.join(&file_name);
        if let Err(error) = tokio::fs::write(&target, &bytes).await {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
        }
        info!(path = %target.display(), bytes = bytes.len(), "saved upload");
        saved.push(target);
    }

    if saved.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No files provided");
    }

    let pipeline = state.pipeline.clone();
    let job_id = state
        .jobs
        .submit(async move { pipeline.run(saved).await.map(|outcome| outcome.summary()) })
        .await;

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "Indexing started", "job_id": job_id })),
    )
        .into_response()
}

async fn job_status<E, V, L>(
    State(state): State<Arc<AppState<E, V, L>>>,
    UrlPath(id): UrlPath<JobId>,
) -> Response
where
    E: Embedder + Clone + 'static,
    V: VectorIndex + Clone + 'static,
    L: ChatModel + 'static,
{
    match state.jobs.status(id).await {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, RagError::UnknownJob(id).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use docqa_core::{
        CharacterNgramEmbedder, ChatMessage, Chunk, InMemoryStore, Indexer, JobState,
        ServiceError,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::path::Path;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct FixedModel {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl ChatModel for FixedModel {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ServiceError> {
            self.reply
                .clone()
                .map_err(|details| ServiceError::BackendResponse {
                    backend: "openai".to_string(),
                    status: 401,
                    details,
                })
        }
    }

    type TestState = AppState<CharacterNgramEmbedder, InMemoryStore, FixedModel>;

    async fn state_with(reply: Result<String, String>, upload_dir: &Path) -> Arc<TestState> {
        let embedder = CharacterNgramEmbedder::default();
        let store = InMemoryStore::new();
        Indexer::new(embedder, store.clone())
            .index(&[
                Chunk {
                    chunk_id: Uuid::new_v4(),
                    text: "Overdraft fees are 25 dollars per item.".to_string(),
                    source_path: "/data/docs/fees.pdf".to_string(),
                    page_number: Some(0),
                },
                Chunk {
                    chunk_id: Uuid::new_v4(),
                    text: "Branch hours are nine to five.".to_string(),
                    source_path: "/data/docs/hours.txt".to_string(),
                    page_number: None,
                },
            ])
            .await
            .unwrap();

        Arc::new(AppState {
            engine: ConversationEngine::new(embedder, store.clone(), FixedModel { reply }),
            pipeline: IndexingPipeline::new(embedder, store),
            jobs: JobRegistry::new(),
            upload_dir: upload_dir.to_path_buf(),
        })
    }

    async fn send(state: Arc<TestState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn index_page_is_served() {
        let dir = TempDir::new().unwrap();
        let state = state_with(Ok("ok".to_string()), dir.path()).await;
        let response = router(state)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("/api/ask"));
    }

    #[tokio::test]
    async fn blank_or_missing_question_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state = state_with(Ok("ok".to_string()), dir.path()).await;

        let (status, body) = send(state.clone(), json_post("/api/ask", json!({ "question": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Question is required");

        let (status, _) = send(state.clone(), json_post("/api/ask", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::post("/api/ask").body(Body::from("not json")).unwrap();
        let (status, _) = send(state.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.engine.sessions().history(DEFAULT_SESSION).await.is_empty());
    }

    #[tokio::test]
    async fn ask_returns_answer_with_basename_sources() {
        let dir = TempDir::new().unwrap();
        let state = state_with(Ok("25 dollars.".to_string()), dir.path()).await;

        let (status, body) = send(
            state.clone(),
            json_post("/api/ask", json!({ "question": " What are overdraft fees? " })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "25 dollars.");
        assert_eq!(body["question"], "What are overdraft fees?");
        let sources = body["sources"].as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources
            .iter()
            .any(|source| source["source"] == "fees.pdf" && source["page"] == 0));
        assert!(sources
            .iter()
            .any(|source| source["source"] == "hours.txt" && source["page"].is_null()));
    }

    #[tokio::test]
    async fn sessions_are_kept_apart_and_cleared_individually() {
        let dir = TempDir::new().unwrap();
        let state = state_with(Ok("noted".to_string()), dir.path()).await;

        for session in ["alice", "bob"] {
            let (status, _) = send(
                state.clone(),
                json_post("/api/ask", json!({ "question": "fees?", "session_id": session })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) =
            send(state.clone(), json_post("/api/clear", json!({ "session_id": "alice" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Conversation cleared successfully");

        let sessions = state.engine.sessions();
        assert!(sessions.history("alice").await.is_empty());
        assert_eq!(sessions.history("bob").await.turns().len(), 1);

        let request = Request::post("/api/clear").body(Body::empty()).unwrap();
        let (status, _) = send(state.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn backend_failure_is_a_500_with_the_service_text() {
        let dir = TempDir::new().unwrap();
        let state = state_with(Err("invalid api key".to_string()), dir.path()).await;

        let (status, body) = send(state, json_post("/api/ask", json!({ "question": "fees?" }))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            "llm call failed: openai returned 401: invalid api key"
        );
    }

    #[tokio::test]
    async fn upload_starts_a_job_that_indexes_supported_files() {
        let dir = TempDir::new().unwrap();
        let upload_dir = dir.path().join("uploads");
        let state = state_with(Ok("ok".to_string()), &upload_dir).await;

        let boundary = "docqa-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
Content-Disposition: form-data; name=\"files\"; filename=\"../policy.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
Wire transfers settle within one business day.\r\n\
--{boundary}\r\n\
Content-Disposition: form-data; name=\"files\"; filename=\"memo.docx\"\r\n\
Content-Type: application/octet-stream\r\n\r\n\
binary\r\n\
--{boundary}--\r\n"
        );
        let request = Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, body) = send(state.clone(), request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "Indexing started");
        assert!(upload_dir.join("policy.txt").is_file());

        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
        let finished = state.jobs.wait(job_id).await.unwrap();
        match finished.state {
            JobState::Succeeded { summary } => {
                assert_eq!(summary.files, 2);
                assert_eq!(summary.documents, 1);
                assert_eq!(summary.skipped, 1);
                assert!(summary.chunks >= 1);
            }
            other => panic!("unexpected state {other:?}"),
        }

        let (status, body) = send(
            state.clone(),
            Request::get(format!("/api/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "succeeded");
        assert_eq!(body["summary"]["documents"], 1);
    }

    #[tokio::test]
    async fn upload_without_files_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state = state_with(Ok("ok".to_string()), dir.path()).await;
        let boundary = "empty-boundary";
        let request = Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(format!("--{boundary}--\r\n")))
            .unwrap();

        let (status, body) = send(state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No files provided");
    }

    #[tokio::test]
    async fn unknown_job_is_a_404() {
        let dir = TempDir::new().unwrap();
        let state = state_with(Ok("ok".to_string()), dir.path()).await;
        let id = Uuid::new_v4();
        let (status, body) = send(
            state,
            Request::get(format!("/api/jobs/{id}")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], format!("unknown job: {id}"));
    }

    #[test]
    fn file_names_are_reduced_to_their_last_component() {
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\docs\\loan.pdf").as_deref(), Some("loan.pdf"));
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("dir/"), None);
    }
}
