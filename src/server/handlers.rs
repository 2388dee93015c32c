//! HTTP request handlers.

use crate::db::{self, Annotation, Book};
use crate::error::{AppError, Result};
use crate::formats::{self, BookFormat, cover};
use crate::server::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::services::ServeFile;

/// Unwrap a JSON body, turning any rejection into a 400.
fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(value)| value)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e.body_text())))
}

/// Serve a file from disk with Range and conditional request support.
async fn serve_file(
    path: &std::path::Path,
    content_type: &'static str,
    missing: &str,
    request: Request,
) -> Result<Response> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(AppError::NotFound(missing.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(missing.to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    let mut response = ServeFile::new(path).try_call(request).await?.map(Body::new);

    // Extensions like .azw3 or .cbz are not guessed correctly
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    Ok(response)
}

// ============================================================================
// BOOKS
// ============================================================================

/// All books, newest first.
pub async fn list_books(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.db.list_books()?))
}

/// Upload a book (multipart field `book`, or `epub` from older clients).
pub async fn upload_book(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<Book>> {
    while let Some(field) = multipart.next_field().await? {
        if !matches!(field.name(), Some("book" | "epub")) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing file name".to_string()))?;
        let data = field.bytes().await?;

        let library = state.library.clone();
        let book =
            tokio::task::spawn_blocking(move || library.import_upload(&filename, &data)).await??;
        return Ok(Json(book));
    }

    Err(AppError::BadRequest("Missing book file".to_string()))
}

/// One book.
pub async fn get_book(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Book>> {
    Ok(Json(state.library.book(&id)?))
}

/// Delete a book with its annotations and files.
pub async fn delete_book(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
    let library = state.library.clone();
    tokio::task::spawn_blocking(move || library.remove(&id)).await??;
    Ok(Json(json!({ "status": "deleted" })))
}

/// Book file. Readers fetch large PDFs in ranges.
pub async fn serve_book_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response> {
    let book = state.library.book(&id)?;
    serve_file(
        std::path::Path::new(&book.file_path),
        book.file_type.mime_type(),
        "Book file not found",
        request,
    )
    .await
}

/// Cover image.
pub async fn serve_cover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response> {
    let cover_path = state
        .db
        .get_book(&id)?
        .and_then(|book| book.cover_path)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| AppError::NotFound("Cover not found".to_string()))?;

    let path = std::path::Path::new(&cover_path);
    serve_file(path, cover::content_type_for(path), "Cover not found", request).await
}

/// Cover upload response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverResponse {
    cover_path: String,
}

/// Replace the cover (multipart field `cover`).
pub async fn upload_cover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<CoverResponse>> {
    state.library.book(&id)?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("cover") {
            continue;
        }

        let data = field.bytes().await?;
        let library = state.library.clone();
        let id = id.clone();
        let cover_path = tokio::task::spawn_blocking(move || library.set_cover(&id, &data)).await??;
        return Ok(Json(CoverResponse { cover_path }));
    }

    Err(AppError::BadRequest("Missing cover file".to_string()))
}

/// Reading progress update.
#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    progress: Option<String>,
}

/// Save the reading position.
pub async fn save_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<ProgressRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let req = json_body(body)?;
    let progress = req
        .progress
        .ok_or_else(|| AppError::BadRequest("Progress is required".to_string()))?;

    if !state.db.update_reading_progress(&id, &progress)? {
        return Err(AppError::NotFound("Book not found".to_string()));
    }

    Ok(Json(json!({ "status": "ok" })))
}

// ============================================================================
// ANNOTATIONS
// ============================================================================

/// Annotations of a book, newest first.
pub async fn list_annotations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Annotation>>> {
    Ok(Json(state.db.list_annotations(&id)?))
}

/// New annotation.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAnnotationRequest {
    #[serde(default)]
    cfi: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

/// Create an annotation.
pub async fn create_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<CreateAnnotationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Annotation>)> {
    let req = json_body(body)?;

    let (Some(cfi), Some(text)) = (
        req.cfi.filter(|s| !s.is_empty()),
        req.text.filter(|s| !s.is_empty()),
    ) else {
        return Err(AppError::BadRequest("CFI and text are required".to_string()));
    };

    state.library.book(&id)?;

    let annotation = Annotation {
        id: uuid::Uuid::new_v4().to_string(),
        book_id: id,
        cfi,
        text,
        note: req.note.filter(|s| !s.is_empty()),
        color: req
            .color
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| db::DEFAULT_COLOR.to_string()),
        created_at: db::now(),
    };

    state.db.insert_annotation(&annotation)?;
    tracing::debug!(book_id = %annotation.book_id, annotation_id = %annotation.id, "Annotation created");

    Ok((StatusCode::CREATED, Json(annotation)))
}

/// Annotation update.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateAnnotationRequest {
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

/// Update the note and color of an annotation.
pub async fn update_annotation(
    State(state): State<AppState>,
    Path((id, annotation_id)): Path<(String, String)>,
    body: std::result::Result<Json<UpdateAnnotationRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let req = json_body(body)?;
    let note = req.note.filter(|s| !s.is_empty());
    let color = req.color.filter(|s| !s.is_empty());

    if !state
        .db
        .update_annotation(&id, &annotation_id, note.as_deref(), color.as_deref())?
    {
        return Err(AppError::NotFound("Annotation not found".to_string()));
    }

    Ok(Json(json!({ "status": "ok" })))
}

/// Delete an annotation.
pub async fn delete_annotation(
    State(state): State<AppState>,
    Path((id, annotation_id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    if !state.db.delete_annotation(&id, &annotation_id)? {
        return Err(AppError::NotFound("Annotation not found".to_string()));
    }

    Ok(Json(json!({ "status": "deleted" })))
}

// ============================================================================
// LIBRARY
// ============================================================================

/// Scan response.
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    added: usize,
    books: Vec<Book>,
}

/// Rescan the books directory.
pub async fn scan(State(state): State<AppState>) -> Result<Json<ScanResponse>> {
    let scan_state = state.clone();
    let books = tokio::task::spawn_blocking(move || scan_state.scan()).await??;

    Ok(Json(ScanResponse {
        added: books.len(),
        books,
    }))
}

/// Supported format catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatsResponse {
    /// Formats rendered by the Foliate reader.
    pub foliate_formats: Vec<BookFormat>,
    /// Reflowable text formats.
    pub text_formats: Vec<BookFormat>,
    /// Accepted file extensions, with dot.
    pub supported_extensions: Vec<&'static str>,
    /// Value for a file input `accept` attribute.
    pub file_accept: String,
}

impl FormatsResponse {
    /// Current format catalog.
    pub fn current() -> Self {
        Self {
            foliate_formats: formats::FOLIATE_FORMATS.to_vec(),
            text_formats: formats::TEXT_FORMATS.to_vec(),
            supported_extensions: formats::SUPPORTED_EXTENSIONS.to_vec(),
            file_accept: formats::FILE_ACCEPT.clone(),
        }
    }
}

/// Supported formats.
pub async fn list_formats() -> Json<FormatsResponse> {
    Json(FormatsResponse::current())
}

/// Unknown API path.
pub async fn api_not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}
