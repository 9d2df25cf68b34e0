use std::path::Path;

use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::annotate::{AnnotateError, encode_png};
use crate::config::{ALLOWED_EXTENSIONS, has_allowed_extension};
use crate::detector::{DetectionReport, ModelInfo};
use crate::fetch::FetchError;
use crate::server::state::AppState;
use crate::storage::StorageError;
use crate::yolov8::YoloV8Error;

const INDEX_HTML: &str = include_str!("../../templates/index.html");

/// Upload failures. Every variant is reported to the page as
/// `{"error": ...}` with status 200.
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    /// No multipart body or no field with the expected name.
    #[error("No file uploaded")]
    MissingFile,

    /// The file field has an empty file name.
    #[error("No file selected")]
    EmptyFilename,

    /// The file name does not carry an image extension.
    #[error("Invalid file type. Please upload an image ({})", ALLOWED_EXTENSIONS.join(", "))]
    UnsupportedType,

    /// The bytes do not decode as an image.
    #[error("Uploaded file is not a valid image")]
    NotAnImage(#[source] image::ImageError),

    /// The URL upload body had no usable `url`.
    #[error("No image URL provided")]
    MissingUrl,

    /// Downloading a URL upload failed.
    #[error("Failed to load image from URL: {0}")]
    Fetch(#[from] FetchError),

    /// Reading the request body failed, including oversized uploads.
    #[error("An error occurred: {0}")]
    Multipart(#[from] MultipartError),

    /// Inference failed.
    #[error("An error occurred: {0}")]
    Detection(#[from] YoloV8Error),

    /// Drawing or encoding the annotated image failed.
    #[error("An error occurred: {0}")]
    Annotate(#[from] AnnotateError),

    /// Writing the annotated image failed.
    #[error("An error occurred: {0}")]
    Storage(#[from] StorageError),

    /// A model upload that is not a safetensors file.
    #[error("Model must be a .safetensors file")]
    UnsupportedModel,

    /// Saving an uploaded model failed.
    #[error("An error occurred: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking worker panicked or was cancelled.
    #[error("An error occurred: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        tracing::warn!("upload rejected: {self}");
        Json(json!({ "error": self.to_string() })).into_response()
    }
}

/// Successful detection on an uploaded image.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    success: bool,
    annotated_image: String,
    #[serde(flatten)]
    report: DetectionReport,
}

/// Body of a URL upload.
#[derive(Debug, Deserialize)]
pub struct UrlUpload {
    url: String,
}

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /api/info`
pub async fn info(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(state.detector.info())
}

/// `POST /upload`: multipart field `file`.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    let mut multipart = multipart.map_err(|_| UploadError::MissingFile)?;
    let (file_name, bytes) = read_file_field(&mut multipart, "file").await?;
    if file_name.is_empty() {
        return Err(UploadError::EmptyFilename);
    }
    if !has_allowed_extension(&file_name) {
        return Err(UploadError::UnsupportedType);
    }
    tracing::info!(%file_name, size = bytes.len(), "image uploaded");

    process_image(&state, bytes).await.map(Json)
}

/// `POST /upload-url`: JSON `{"url": ...}`.
pub async fn upload_url(
    State(state): State<AppState>,
    body: Result<Json<UrlUpload>, JsonRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    let Json(UrlUpload { url }) = body.map_err(|_| UploadError::MissingUrl)?;
    if url.trim().is_empty() {
        return Err(UploadError::MissingUrl);
    }
    tracing::info!(%url, "image requested by url");

    let fetcher = state.fetcher.clone();
    let bytes = tokio::task::spawn_blocking(move || fetcher.fetch(&url)).await??;

    process_image(&state, bytes).await.map(Json)
}

/// `POST /model`: multipart field `model` holding safetensors weights.
pub async fn upload_model(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, UploadError> {
    let mut multipart = multipart.map_err(|_| UploadError::MissingFile)?;
    let (file_name, bytes) = read_file_field(&mut multipart, "model").await?;
    let name = Path::new(&file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| n.ends_with(".safetensors"))
        .ok_or(UploadError::UnsupportedModel)?
        .to_string();

    tokio::fs::create_dir_all(&state.model_dir).await?;
    let path = state.model_dir.join(&name);
    tokio::fs::write(&path, &bytes).await?;
    tracing::info!(path = %path.display(), size = bytes.len(), "model weights saved");

    Ok(Json(json!({
        "saved": name,
        "message": "Model saved. Restart the service to load it (name it best.safetensors or pass --weights).",
    })))
}

async fn read_file_field(
    multipart: &mut Multipart,
    name: &str,
) -> Result<(String, Vec<u8>), UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(name) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        return Ok((file_name, bytes.to_vec()));
    }
    Err(UploadError::MissingFile)
}

/// Decode, detect, annotate and store one image off the async runtime.
async fn process_image(state: &AppState, bytes: Vec<u8>) -> Result<UploadResponse, UploadError> {
    let detector = state.detector.clone();
    let annotator = state.annotator.clone();
    let store = state.store.clone();

    tokio::task::spawn_blocking(move || -> Result<UploadResponse, UploadError> {
        let image = image::load_from_memory(&bytes)
            .map_err(UploadError::NotAnImage)?
            .to_rgb8();
        let report = detector.detect(&image)?;
        let annotated = annotator.annotate(&image, report.detections());
        let annotated_image = store.save_png(&encode_png(&annotated)?)?;
        tracing::info!(
            %annotated_image,
            total_detections = report.total_detections(),
            "image processed"
        );
        Ok(UploadResponse {
            success: true,
            annotated_image,
            report,
        })
    })
    .await?
}
