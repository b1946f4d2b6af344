//! HTTP API.
//!
//! # Endpoints
//!
//! | Method   | Path                          | Description |
//! |----------|-------------------------------|-------------|
//! | `GET`    | `/health`                     | Liveness and version |
//! | `POST`   | `/api/search`                 | Relevance-filtered search |
//! | `GET`    | `/api/status`                 | Document counts |
//! | `POST`   | `/api/index`                  | Start a pass (202), or index one file |
//! | `GET`    | `/api/progress`               | Current pass snapshot |
//! | `POST`   | `/api/clear`                  | Delete every document |
//! | `POST`   | `/api/sessions`               | Allocate a new session id |
//! | `GET`    | `/api/sessions/{id}/messages` | Session history |
//! | `POST`   | `/api/sessions/{id}/messages` | Append a message |
//! | `DELETE` | `/api/sessions/{id}`          | Reset a session |
//! | `GET`    | `/tools/list`                 | Registered tools with schemas |
//! | `POST`   | `/tools/{name}`               | Call a tool |
//!
//! # Error contract
//!
//! ```json
//! { "success": false, "error": { "code": "invalid_input", "message": "query must not be empty" } }
//! ```
//!
//! `invalid_input` and `embeddings_disabled` map to 400, `not_found` to 404,
//! `already_running` to 409, `rate_limited` to 429, other embedding failures
//! to 502, and everything else to 500.
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::service::{AppendRequest, IndexRequest, RagService, SearchRequest, ServiceError};
use crate::tools::{ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    service: Arc<RagService>,
    tools: Arc<ToolRegistry>,
}

/// Serve until Ctrl-C, on the address configured in `[server].bind`.
pub async fn run_server(service: Arc<RagService>, tools: ToolRegistry) -> anyhow::Result<()> {
    let bind_addr = service.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, tools = tools.len(), "listening");

    axum::serve(listener, router(service, tools))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

pub fn router(service: Arc<RagService>, tools: ToolRegistry) -> Router {
    let state = AppState {
        service,
        tools: Arc::new(tools),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/search", post(handle_search))
        .route("/api/status", get(handle_status))
        .route("/api/index", post(handle_index))
        .route("/api/progress", get(handle_progress))
        .route("/api/clear", post(handle_clear))
        .route("/api/sessions", post(handle_new_session))
        .route(
            "/api/sessions/{id}/messages",
            get(handle_history).post(handle_append),
        )
        .route("/api/sessions/{id}", delete(handle_reset))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

struct AppError(ServiceError);

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "invalid_input" | "embeddings_disabled" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "already_running" => StatusCode::CONFLICT,
        "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
        "embedding_error" | "embedding_exhausted" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (status_for(self.0.code), Json(self.0)).into_response()
    }
}

/// Parse a JSON body, treating an empty body as `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError(ServiceError::invalid_input(format!("invalid JSON body: {e}"))))
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_search(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let req: SearchRequest = parse_body(&body)?;
    let response = state.service.search(req).await?;
    Ok(Json(response).into_response())
}

async fn handle_status(State(state): State<AppState>) -> Result<Response, AppError> {
    Ok(Json(state.service.status().await?).into_response())
}

/// A full pass runs in the background and answers 202; a single file is
/// indexed inline.
async fn handle_index(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let req: IndexRequest = parse_body(&body)?;
    if req.file.is_some() {
        let outcome = state.service.index(req).await?;
        return Ok(Json(outcome).into_response());
    }
    state.service.start_background_index(req.force)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "status": "started" })),
    )
        .into_response())
}

async fn handle_progress(State(state): State<AppState>) -> Response {
    Json(state.service.progress()).into_response()
}

async fn handle_clear(State(state): State<AppState>) -> Result<Response, AppError> {
    Ok(Json(state.service.clear().await?).into_response())
}

async fn handle_new_session() -> Json<Value> {
    Json(json!({ "session_id": uuid::Uuid::new_v4().to_string() }))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, AppError> {
    let history = state.service.session_history(&id, params.limit).await?;
    Ok(Json(history).into_response())
}

async fn handle_append(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: AppendRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError(ServiceError::invalid_input(format!("invalid JSON body: {e}"))))?;
    let message = state.service.session_append(&id, req).await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

async fn handle_reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    Ok(Json(state.service.session_reset(&id).await?).into_response())
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let params: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError(ServiceError::invalid_input(format!("invalid JSON body: {e}"))))?
    };
    let ctx = ToolContext::new(state.service.clone());
    let result = state.tools.call(&name, params, &ctx).await?;
    Ok(Json(json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn spawn(tmp: &TempDir) -> String {
        let root = tmp.path().join("corpus");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() { serve(); }\n").unwrap();
        fs::write(root.join("GUIDE.md"), "# Guide\n\nHow to serve requests.\n").unwrap();

        let mut config = Config::with_db_path(tmp.path().join("rag.sqlite"));
        config.corpus.root = root;
        config.embedding.provider = "hash".into();
        crate::config::validate(&mut config).unwrap();
        let service = Arc::new(RagService::open(config).await.unwrap());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(service, ToolRegistry::with_builtins());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn wait_until_idle(client: &reqwest::Client, base: &str) -> Value {
        for _ in 0..200 {
            let progress: Value = client
                .get(format!("{base}/api/progress"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if progress == json!("idle") || progress["phase"] == "error" {
                return progress;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("indexing did not finish");
    }

    #[tokio::test]
    async fn index_then_search_over_http() {
        let tmp = TempDir::new().unwrap();
        let base = spawn(&tmp).await;
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let started = client.post(format!("{base}/api/index")).send().await.unwrap();
        assert_eq!(started.status(), StatusCode::ACCEPTED);
        wait_until_idle(&client, &base).await;

        let status: Value = client
            .get(format!("{base}/api/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["total"], 2);

        let search: Value = client
            .post(format!("{base}/api/search"))
            .json(&json!({ "query": "serve requests", "threshold": 0.0 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(search["count"], 2);
        assert!(search["relevant"].as_array().is_some());
    }

    #[tokio::test]
    async fn errors_carry_code_and_status() {
        let tmp = TempDir::new().unwrap();
        let base = spawn(&tmp).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/search"))
            .json(&json!({ "query": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "invalid_input");

        let resp = client
            .post(format!("{base}/tools/unknown"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let tmp = TempDir::new().unwrap();
        let base = spawn(&tmp).await;
        let client = reqwest::Client::new();

        let created: Value = client
            .post(format!("{base}/api/sessions"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["session_id"].as_str().unwrap().to_string();

        let resp = client
            .post(format!("{base}/api/sessions/{id}/messages"))
            .json(&json!({ "role": "user", "content": "where is main?" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let history: Value = client
            .get(format!("{base}/api/sessions/{id}/messages?limit=10"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history["total"], 1);
        assert_eq!(history["messages"][0]["role"], "user");

        let reset: Value = client
            .delete(format!("{base}/api/sessions/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reset["deleted"], 1);
    }
}
