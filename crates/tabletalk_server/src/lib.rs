use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use tabletalk_api::{QueryRequest, QueryResponse, UploadResponse};
use tabletalk_core::llm_protocol::LlmClient;
use tabletalk_core::session::Session;
use tabletalk_core::table::{load_csv, schema_summary, TableError};

/// Process-wide state: the LLM client plus one explicit session slot with
/// a creation/reset lifecycle. The async mutex doubles as the per-session
/// query serializer: holding it across `query` keeps one query in flight.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

struct StateInner {
    llm: Arc<dyn LlmClient>,
    max_turns: usize,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl AppState {
    pub fn new(llm: Arc<dyn LlmClient>, max_turns: usize) -> Self {
        Self {
            inner: Arc::new(StateInner { llm, max_turns, session: tokio::sync::Mutex::new(None) }),
        }
    }
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn detail(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "detail": message.into() })))
}

async fn health() -> &'static str {
    "ok"
}

async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut payload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| detail(StatusCode::BAD_REQUEST, format!("Error parsing multipart field: {e}")))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.csv").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| detail(StatusCode::BAD_REQUEST, format!("Failed to read upload data: {e}")))?;
            payload = Some((filename, bytes.to_vec()));
            break;
        }
    }
    let (filename, bytes) =
        payload.ok_or_else(|| detail(StatusCode::BAD_REQUEST, "Missing multipart field `file`."))?;

    if !filename.ends_with(".csv") {
        return Err(detail(StatusCode::BAD_REQUEST, "Invalid file type."));
    }

    let df = load_csv(&bytes).map_err(|e| match e {
        TableError::Parse(_) => detail(StatusCode::BAD_REQUEST, e.to_string()),
        TableError::Io(_) => {
            detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Error during file processing: {e}"))
        }
    })?;

    let (shape, columns) = schema_summary(&df);

    // Rebuilding the session is the reset: new agent, new tool binding,
    // cleared conversational memory.
    let session = Session::new(df, state.inner.llm.clone(), state.inner.max_turns);
    *state.inner.session.lock().await = Some(session);
    tracing::info!(%filename, rows = shape.0, cols = shape.1, "dataset loaded, agent rebuilt");

    Ok(Json(UploadResponse {
        status: "success".into(),
        message: "File uploaded and agent created successfully.".into(),
        filename,
        shape,
        columns,
    }))
}

async fn invoke_agent(
    State(state): State<AppState>,
    Json(body): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let mut guard = state.inner.session.lock().await;
    let session = guard.as_mut().ok_or_else(|| {
        detail(
            StatusCode::BAD_REQUEST,
            "No dataset loaded. Please upload a CSV file via the /upload endpoint first.",
        )
    })?;

    let outcome = session.query(&body.input).await.map_err(|e| {
        detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Agent failed to process the request: {e:#}"))
    })?;

    Ok(Json(QueryResponse {
        status: "success".into(),
        final_answer: outcome.final_answer,
        generated_plot: outcome.plot,
    }))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload_csv))
        .route("/invoke", post(invoke_agent))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tabletalk server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
