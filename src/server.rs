use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use askama::Template;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{Request, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Utc;
use tempfile::NamedTempFile;
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::documents::{DeleteOutcome, DocumentLibrary, UploadError};
use crate::ingest::{DocumentKind, ALLOWED_EXTENSIONS};
use crate::models::{DeleteFileRequest, DocumentInfo, QueryInput, QueryResponse, UploadResponse};
use crate::session::resolve_session;

#[derive(Clone)]
struct AppState {
    chat: ChatService,
    library: DocumentLibrary,
    upload_dir: PathBuf,
}

pub async fn run_server(
    config: AppConfig,
    chat_service: ChatService,
    library: DocumentLibrary,
) -> Result<()> {
    tokio::fs::create_dir_all(config.upload_dir()).await?;

    let app = build_router(&config, chat_service, library);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(config: &AppConfig, chat: ChatService, library: DocumentLibrary) -> Router {
    let state = AppState {
        chat,
        library,
        upload_dir: config.upload_dir(),
    };

    let api = Router::new()
        .route("/chat", post(chat_handler))
        .route("/upload-doc", post(upload_handler))
        .route("/list-docs", get(list_docs))
        .route("/delete-doc", delete(delete_doc));

    let app = Router::new()
        .route("/", get(health_page))
        .nest("/chatbot", api)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(state);

    if !config.tracing.enabled {
        return app;
    }

    let project = config.tracing.project.clone();
    app.layer(
        TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                project = %project,
                method = %request.method(),
                uri = %request.uri(),
            )
        }),
    )
}

async fn health_page() -> Result<Html<String>, ApiError> {
    let template = HealthTemplate {
        service: env!("CARGO_PKG_NAME"),
        checked_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    };
    Ok(Html(template.render()?))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryInput>,
) -> Result<Json<QueryResponse>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(ApiError::bad_request("question cannot be empty"));
    }

    let session_id = resolve_session(request.session_id.as_deref());
    if session_id.trim().is_empty() {
        return Err(ApiError::bad_request("session id cannot be empty"));
    }

    let answer = state
        .chat
        .answer(&request.question, &session_id, request.model)
        .await?;

    Ok(Json(QueryResponse {
        answer,
        session_id,
        model: request.model,
    }))
}

async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("uploaded file has no filename"))?;

        let kind = DocumentKind::from_filename(&filename).ok_or_else(|| {
            ApiError::bad_request(format!(
                "Unsupported file type. Allowed types are: {}",
                ALLOWED_EXTENSIONS.join(", ")
            ))
        })?;

        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(err.to_string()))?;

        // Removed from disk when `temp` drops, whichever way this returns.
        let temp = write_temp_upload(&state.upload_dir, kind, &bytes).await?;

        return match state
            .library
            .register_and_index(&filename, temp.path())
            .await
        {
            Ok(file_id) => Ok(Json(UploadResponse {
                message: format!("File {filename} has been successfully uploaded and indexed."),
                file_id,
            })),
            Err(UploadError::IndexingFailed) => {
                Err(ApiError::internal(format!("Failed to index {filename}.")))
            }
            Err(UploadError::RecordFailed(reason)) => Err(ApiError::internal(format!(
                "Failed to register {filename}: {reason}"
            ))),
        };
    }

    Err(ApiError::bad_request("missing multipart field `file`"))
}

async fn write_temp_upload(dir: &Path, kind: DocumentKind, bytes: &[u8]) -> Result<NamedTempFile> {
    tokio::fs::create_dir_all(dir).await?;
    let temp = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(kind.extension())
        .tempfile_in(dir)
        .context("failed to create temp upload file")?;
    tokio::fs::write(temp.path(), bytes)
        .await
        .context("failed to write temp upload file")?;
    Ok(temp)
}

async fn list_docs(State(state): State<AppState>) -> Result<Json<Vec<DocumentInfo>>, ApiError> {
    Ok(Json(state.library.list().await?))
}

async fn delete_doc(
    State(state): State<AppState>,
    Json(request): Json<DeleteFileRequest>,
) -> Response {
    let file_id = request.file_id;
    match state.library.delete(&file_id).await {
        DeleteOutcome::Deleted => Json(serde_json::json!({
            "message": format!("Successfully deleted document with file_id {file_id} from the system.")
        }))
        .into_response(),
        DeleteOutcome::IndexDeleteFailed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": format!("Failed to delete document with file_id {file_id} from the vector index."),
                "stage": "vector_index",
            })),
        )
            .into_response(),
        DeleteOutcome::RecordDeleteFailed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": format!(
                    "Deleted from the vector index but failed to delete document with file_id {file_id} from the database."
                ),
                "stage": "document_store",
            })),
        )
            .into_response(),
    }
}

#[derive(Template)]
#[template(path = "health.html")]
struct HealthTemplate {
    service: &'static str,
    checked_at: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        tracing::error!("request failed: {:#}", value);
        Self::internal(format!("{:#}", value))
    }
}

impl From<askama::Error> for ApiError {
    fn from(value: askama::Error) -> Self {
        Self::internal(value.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
