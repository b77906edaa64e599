//! Request handlers.
//!
//! Every handler validates and extracts its inputs, then hands the storage work to
//! [`filegate_core::StorageService`] on the blocking pool.

use crate::error::ApiError;
use crate::urls::{download_url, view_url};
use crate::{ApiDoc, AppState};
use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, Multipart, Path, Query, Request,
        State,
    },
    http::{self, header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{Json, Response},
};
use filegate_core::{EntryKind, ListEntry, ResolvedFile, StorageResult};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use utoipa::{IntoParams, OpenApi, ToSchema};

/// Header carrying the target directory of an upload.
pub const FILE_PATH_HEADER: &str = "filepath";

/// Multipart field holding the uploaded file.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadRes {
    pub message: String,
    pub token: String,
    #[serde(rename = "canonicalPath")]
    pub canonical_path: String,
    #[serde(rename = "viewURL")]
    pub view_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileEntryRes {
    pub name: String,
    /// `file` or `directory`
    pub kind: String,
    pub path: String,
    pub missing_metadata: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListFilesRes {
    pub message: String,
    pub files: Vec<FileEntryRes>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PathReq {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenRes {
    pub message: String,
    pub token: String,
    #[serde(rename = "viewURL")]
    pub view_url: String,
    #[serde(rename = "downloadURL")]
    pub download_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteRes {
    pub message: String,
    #[serde(rename = "removedFiles")]
    pub removed_files: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    /// Access token issued for the file
    token: Option<String>,
}

impl From<ListEntry> for FileEntryRes {
    fn from(entry: ListEntry) -> Self {
        let kind = match entry.kind {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        };
        Self {
            name: entry.name,
            kind: kind.into(),
            path: entry.path.to_string(),
            missing_metadata: entry.missing_metadata,
        }
    }
}

/// Runs a blocking storage operation off the async runtime.
async fn run_blocking<T, F>(operation: F) -> Result<T, ApiError>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(operation).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            tracing::error!("storage task failed: {}", e);
            Err(ApiError::internal())
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint
pub async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Filegate is alive".into(),
    })
}

/// Serves the OpenAPI document.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/upload",
    params(
        ("filePath" = Option<String>, Header, description = "Target directory, relative to the storage root")
    ),
    request_body(
        content = String,
        content_type = "multipart/form-data",
        description = "Multipart form with a `file` field"
    ),
    responses(
        (status = 201, description = "File stored", body = UploadRes),
        (status = 400, description = "Invalid path or missing file", body = ErrorBody),
        (status = 413, description = "Body exceeds the configured limit", body = ErrorBody),
        (status = 415, description = "Media type not allowed", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
/// Upload a single file
///
/// Stores the `file` field of the multipart body under the directory named by the `filePath`
/// header (the storage root if absent) and returns a token granting access to it.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadRes>), ApiError> {
    let mut multipart =
        multipart.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;

    let directory = match headers.get(FILE_PATH_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| ApiError::bad_request("filePath header must be visible ASCII"))?
            .to_owned(),
        None => String::new(),
    };

    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_owned();
        let content_type = field.content_type().map(str::to_owned);
        let content = field.bytes().await?;
        file = Some((file_name, content_type, content));
        break;
    }

    let Some((file_name, content_type, content)) = file else {
        return Err(ApiError::bad_request("No file uploaded."));
    };

    let service = Arc::clone(&state.service);
    let receipt = run_blocking(move || {
        service.upload(&directory, &file_name, content_type.as_deref(), &content)
    })
    .await?;

    let base = state.service.config().public_base_url();
    Ok((
        StatusCode::CREATED,
        Json(UploadRes {
            message: "File uploaded successfully.".into(),
            token: receipt.token.to_string(),
            view_url: view_url(base, &receipt.canonical_path, &receipt.token),
            canonical_path: receipt.canonical_path.to_string(),
        }),
    ))
}

async fn authorise(
    state: &AppState,
    path: String,
    token: Option<String>,
) -> Result<ResolvedFile, ApiError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or_else(ApiError::forbidden)?;

    let service = Arc::clone(&state.service);
    run_blocking(move || service.resolve(&path, &token)).await
}

async fn serve(path: PathBuf, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

#[utoipa::path(
    get,
    path = "/storage/{path}",
    params(
        ("path" = String, Path, description = "File path relative to the storage root"),
        TokenQuery
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 400, description = "Invalid path", body = ErrorBody),
        (status = 403, description = "Invalid or missing token", body = ErrorBody),
        (status = 404, description = "File not found", body = ErrorBody)
    )
)]
/// View a file
///
/// Streams the file inline. Range and conditional requests are honoured.
pub async fn view_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<TokenQuery>,
    request: Request,
) -> Result<Response, ApiError> {
    let resolved = authorise(&state, path, query.token).await?;
    Ok(serve(resolved.absolute_path, request).await)
}

#[utoipa::path(
    post,
    path = "/download/{path}",
    params(
        ("path" = String, Path, description = "File path relative to the storage root"),
        TokenQuery
    ),
    responses(
        (status = 200, description = "File content as an attachment"),
        (status = 400, description = "Invalid path", body = ErrorBody),
        (status = 403, description = "Invalid or missing token", body = ErrorBody),
        (status = 404, description = "File not found", body = ErrorBody)
    )
)]
/// Download a file
///
/// Like [`view_file`], but the response asks the client to save the file under its original
/// upload name.
pub async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    let resolved = authorise(&state, path, query.token).await?;

    let request = http::Request::builder()
        .method(Method::GET)
        .uri("/")
        .body(Body::empty())
        .map_err(|e| {
            tracing::error!("failed to build file request: {}", e);
            ApiError::internal()
        })?;

    let mut response = serve(resolved.absolute_path, request).await;
    if response.status().is_success() {
        response.headers_mut().insert(
            header::CONTENT_DISPOSITION,
            content_disposition(&resolved.record.display_name),
        );
    }
    Ok(response)
}

/// `attachment` disposition with an ASCII fallback name and the exact name in `filename*`.
fn content_disposition(display_name: &str) -> HeaderValue {
    let fallback: String = display_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' ' => ' ',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    let encoded = utf8_percent_encode(display_name, NON_ALPHANUMERIC);

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

async fn list(
    state: AppState,
    directory: String,
) -> Result<(StatusCode, Json<ListFilesRes>), ApiError> {
    let service = Arc::clone(&state.service);
    let entries = run_blocking(move || service.list(&directory)).await?;

    Ok((
        StatusCode::CREATED,
        Json(ListFilesRes {
            message: "Files listed successfully.".into(),
            files: entries.into_iter().map(FileEntryRes::from).collect(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/listFiles",
    responses(
        (status = 201, description = "Entries of the storage root", body = ListFilesRes),
        (status = 404, description = "Storage root is empty", body = ErrorBody)
    )
)]
/// List the storage root
pub async fn list_root(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ListFilesRes>), ApiError> {
    list(state, String::new()).await
}

#[utoipa::path(
    post,
    path = "/listFiles/{path}",
    params(
        ("path" = String, Path, description = "Directory relative to the storage root")
    ),
    responses(
        (status = 201, description = "Entries of the directory", body = ListFilesRes),
        (status = 400, description = "Invalid path", body = ErrorBody),
        (status = 404, description = "Directory missing or empty", body = ErrorBody)
    )
)]
/// List a directory
///
/// Files are reported under their original upload name. A file with no index record is listed
/// under its stored name with `missingMetadata` set.
pub async fn list_files(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<(StatusCode, Json<ListFilesRes>), ApiError> {
    list(state, path).await
}

fn path_from(body: Result<Json<PathReq>, JsonRejection>) -> Result<String, ApiError> {
    body.map(|Json(req)| req.path)
        .map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))
}

#[utoipa::path(
    post,
    path = "/getToken",
    request_body = PathReq,
    responses(
        (status = 201, description = "Token for the file", body = TokenRes),
        (status = 400, description = "Invalid or missing path", body = ErrorBody),
        (status = 404, description = "File not found", body = ErrorBody)
    )
)]
/// Look up the token of a stored file
pub async fn get_token(
    State(state): State<AppState>,
    body: Result<Json<PathReq>, JsonRejection>,
) -> Result<(StatusCode, Json<TokenRes>), ApiError> {
    let path = path_from(body)?;

    let service = Arc::clone(&state.service);
    let record = run_blocking(move || service.issue_token(&path)).await?;

    let base = state.service.config().public_base_url();
    Ok((
        StatusCode::CREATED,
        Json(TokenRes {
            message: "Token fetched successfully.".into(),
            token: record.token.to_string(),
            view_url: view_url(base, &record.canonical_path, &record.token),
            download_url: download_url(base, &record.canonical_path, &record.token),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/delete",
    request_body = PathReq,
    responses(
        (status = 201, description = "File or directory deleted", body = DeleteRes),
        (status = 400, description = "Invalid or missing path", body = ErrorBody),
        (status = 404, description = "Nothing exists at the path", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
/// Delete a file or a whole directory
///
/// Removes the tokens of every file beneath the path, then any directories left empty.
pub async fn delete_path(
    State(state): State<AppState>,
    body: Result<Json<PathReq>, JsonRejection>,
) -> Result<(StatusCode, Json<DeleteRes>), ApiError> {
    let path = path_from(body)?;

    let service = Arc::clone(&state.service);
    let outcome = run_blocking(move || service.delete(&path)).await?;

    Ok((
        StatusCode::CREATED,
        Json(DeleteRes {
            message: "File deleted successfully.".into(),
            removed_files: outcome.removed_files,
        }),
    ))
}
