//! HTTP surface for uploading textbooks and asking questions.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Multipart `file`: store and process a PDF textbook |
//! | `POST` | `/query` | Form `file` (question sheet) or `question` |
//! | `GET`/`POST` | `/query_stream` | Server-sent progress and answer for one `question` |
//! | `GET` | `/files/{name}` | Download a processed text file |
//! | `GET` | `/textbooks` | List uploaded PDFs |
//! | `GET` | `/health` | Liveness and version |
//!
//! Form routes take `multipart/form-data` or
//! `application/x-www-form-urlencoded` bodies. Client errors are
//! `{"error": "..."}` with status 400 or 404.

use crate::config::AppContext;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path as UrlPath, Query, Request, State},
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Form, Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use textbook_rag_core::query::GENERIC_FAILURE_ANSWER;
use textbook_rag_core::{
    discover_pdf_files, extract_questions_from_pdf, ErrorExposure, IngestError, QueryResult,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

type AppState = Arc<AppContext>;

pub fn router(context: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/query", post(handle_query))
        .route(
            "/query_stream",
            get(handle_query_stream_get).post(handle_query_stream_post),
        )
        .route("/files/{name}", get(handle_file))
        .route("/textbooks", get(handle_textbooks))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(context)
}

pub async fn run_server(context: AppState, bind: &str) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&context.config.upload_dir).await?;
    tokio::fs::create_dir_all(&context.config.data_dir).await?;

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "listening");
    axum::serve(listener, router(context)).await?;
    Ok(())
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
    }
}

/// Logs the detail and hides it unless the server exposes errors.
fn internal(exposure: ErrorExposure, detail: impl std::fmt::Display) -> AppError {
    error!(%detail, "request failed");
    let message = match exposure {
        ErrorExposure::Verbatim => detail.to_string(),
        ErrorExposure::Generic => GENERIC_FAILURE_ANSWER.to_string(),
    };
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message,
    }
}

pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("pdf"))
}

/// Reduces a client-supplied name to a single safe path component.
pub fn secure_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|ch| if ch.is_whitespace() { '_' } else { ch })
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}

struct UploadedFile {
    name: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct FormInput {
    file: Option<UploadedFile>,
    question: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionParams {
    question: Option<String>,
}

/// Reads `file` and `question` from a multipart or urlencoded body.
async fn read_form(request: Request) -> Result<FormInput, AppError> {
    let multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| bad_request(rejection.body_text()))?;
        read_multipart(multipart).await
    } else {
        let Form(params) = Form::<QuestionParams>::from_request(request, &())
            .await
            .map_err(|rejection| bad_request(rejection.body_text()))?;
        Ok(FormInput {
            file: None,
            question: params.question,
        })
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<FormInput, AppError> {
    let mut input = FormInput::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| bad_request(error.body_text()))?
    {
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|error| bad_request(error.body_text()))?;
                input.file = Some(UploadedFile {
                    name,
                    bytes: bytes.to_vec(),
                });
            }
            Some("question") => {
                let text = field
                    .text()
                    .await
                    .map_err(|error| bad_request(error.body_text()))?;
                input.question = Some(text);
            }
            _ => {}
        }
    }

    Ok(input)
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    message: String,
    filename: String,
    processed_file: String,
}

async fn handle_upload(
    State(context): State<AppState>,
    request: Request,
) -> Result<Json<UploadResponse>, AppError> {
    let file = read_form(request)
        .await?
        .file
        .ok_or_else(|| bad_request("No file part"))?;
    if file.name.is_empty() {
        return Err(bad_request("No selected file"));
    }
    let filename = secure_filename(&file.name);
    if !allowed_file(&filename) {
        return Err(bad_request("Only PDF files are allowed"));
    }

    let exposure = context.config.exposure();
    let stored = context.config.upload_dir.join(&filename);
    tokio::fs::create_dir_all(&context.config.upload_dir)
        .await
        .map_err(|error| internal(exposure, error))?;
    tokio::fs::write(&stored, &file.bytes)
        .await
        .map_err(|error| internal(exposure, error))?;
    info!(path = %stored.display(), "upload saved, processing");

    let worker = context.clone();
    let processed = tokio::task::spawn_blocking(move || worker.processor.process_pdf(&stored))
        .await
        .map_err(|error| internal(exposure, error))?
        .map_err(|error| internal(exposure, error))?;

    let processed_file = processed
        .text_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();

    Ok(Json(UploadResponse {
        success: true,
        message: "File processed successfully".to_string(),
        filename,
        processed_file,
    }))
}

#[derive(Serialize)]
struct QueryResponse {
    status: &'static str,
    responses: Vec<QueryResult>,
}

async fn handle_query(
    State(context): State<AppState>,
    request: Request,
) -> Result<Json<QueryResponse>, AppError> {
    let exposure = context.config.exposure();

    let responses = match read_form(request).await? {
        FormInput {
            file: Some(file), ..
        } => {
            if file.name.is_empty() {
                return Err(bad_request("No selected file"));
            }
            if !allowed_file(&file.name) {
                return Err(bad_request("Only PDF files are allowed"));
            }

            let worker = context.clone();
            let questions =
                tokio::task::spawn_blocking(move || questions_from_upload(&worker, &file.bytes))
                    .await
                    .map_err(|error| internal(exposure, error))?
                    .map_err(|error| internal(exposure, error))?;

            if questions.is_empty() {
                return Err(bad_request("No questions found in the PDF"));
            }

            context.engine.answer_all(&questions, exposure).await
        }
        FormInput {
            question: Some(question),
            ..
        } => {
            if question.trim().is_empty() {
                return Err(bad_request("Invalid or missing 'question' in request"));
            }

            let outcome = context.engine.answer(&question).await;
            if let Err(failure) = &outcome {
                warn!(%failure, "question failed");
            }
            vec![QueryResult::from_outcome(question, outcome, exposure)]
        }
        FormInput { .. } => return Err(bad_request("No file or question provided")),
    };

    Ok(Json(QueryResponse {
        status: "success",
        responses,
    }))
}

/// Writes the question sheet under a unique name in a temp dir and pulls
/// its questions out. Everything is removed on return.
fn questions_from_upload(context: &AppContext, bytes: &[u8]) -> Result<Vec<String>, IngestError> {
    let workdir = tempfile::tempdir()?;
    let pdf = workdir
        .path()
        .join(format!("{}.pdf", uuid::Uuid::new_v4().simple()));
    std::fs::write(&pdf, bytes)?;
    extract_questions_from_pdf(
        &pdf,
        workdir.path(),
        context.processor.extractor().ocr_engine(),
        context.questions.as_ref(),
    )
}

async fn handle_query_stream_get(
    State(context): State<AppState>,
    Query(params): Query<QuestionParams>,
) -> Result<Response, AppError> {
    stream_answer(context, params.question)
}

async fn handle_query_stream_post(
    State(context): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let input = read_form(request).await?;
    stream_answer(context, input.question)
}

fn stream_answer(context: AppState, question: Option<String>) -> Result<Response, AppError> {
    let question = question
        .filter(|question| !question.trim().is_empty())
        .ok_or_else(|| bad_request("Invalid or missing 'question' in request"))?;

    let events = event_stream(&context, question);
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

fn event_stream(
    context: &AppContext,
    question: String,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send + 'static {
    context
        .engine
        .answer_stream(question, context.config.exposure())
        .map(|event| Event::default().json_data(&event))
}

async fn handle_file(
    State(context): State<AppState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Response, AppError> {
    let safe = secure_filename(&name);
    if safe.is_empty() || safe != name {
        return Err(not_found("File not found"));
    }

    match tokio::fs::read(context.config.data_dir.join(&safe)).await {
        Ok(bytes) => {
            let headers = [(header::CONTENT_TYPE, "text/plain; charset=utf-8")];
            Ok((headers, bytes).into_response())
        }
        Err(error) => {
            warn!(file = %safe, %error, "processed file not served");
            Err(not_found("File not found"))
        }
    }
}

async fn handle_textbooks(State(context): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "textbooks": list_textbooks(&context.config.upload_dir) }))
}

pub fn list_textbooks(upload_dir: &Path) -> Vec<String> {
    discover_pdf_files(upload_dir)
        .into_iter()
        .filter(|path| path.parent() == Some(upload_dir))
        .filter_map(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
        })
        .collect()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
