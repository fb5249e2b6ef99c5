use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::export::{self, ExportFormat, ExportedFile};
use crate::recognition::{ArtifactKind, RecognitionError, RecognitionRequest};
use crate::upload::{StoredUpload, UploadError};

use super::models::{ErrorResponse, ExportRequest, RecognizeRequest, RecognizeResponse};
use super::state::ServerState;

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    pub(crate) message: String,
}

impl ServerError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::internal(format!("{:#}", err))
    }
}

impl From<RecognitionError> for ServerError {
    fn from(err: RecognitionError) -> Self {
        let status = match &err {
            RecognitionError::InvalidImagePath { .. } => StatusCode::BAD_REQUEST,
            RecognitionError::Launch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RecognitionError::Process { .. } => StatusCode::BAD_GATEWAY,
            RecognitionError::ArtifactMissing { .. } => StatusCode::NOT_FOUND,
            RecognitionError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<UploadError> for ServerError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::InvalidName { .. } | UploadError::Empty => StatusCode::BAD_REQUEST,
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::UnsupportedType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::Missing { .. } => StatusCode::NOT_FOUND,
            UploadError::Render { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            UploadError::RendererMissing | UploadError::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                kind: self.kind.to_string(),
            }),
        )
            .into_response()
    }
}

pub(crate) fn upload_request(
    state: &ServerState,
    name: &str,
    bytes: &[u8],
) -> Result<StoredUpload, ServerError> {
    Ok(state.uploads.store(name, bytes)?)
}

/// Recognizes a previously stored upload. Blocks until the recognition tool exits.
pub(crate) fn recognize_request(
    state: &ServerState,
    request: RecognizeRequest,
) -> Result<RecognizeResponse, ServerError> {
    let filename = request
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ServerError::bad_request("filename is required"))?;
    let kind = parse_kind(request.kind.as_deref())?;
    let upload = state.uploads.open(filename)?;
    let mut recognition = RecognitionRequest::new(upload.path.clone());
    if let Some(kind) = kind {
        recognition = recognition.with_kind(kind);
    }
    let result = state.adapter.run(&recognition)?;
    Ok(RecognizeResponse {
        image: upload.path,
        source: upload.source,
        artifact: result.artifact,
        kind: result.kind.to_string(),
        content: result.content,
    })
}

pub(crate) fn export_request(
    state: &ServerState,
    request: &ExportRequest,
) -> Result<ExportedFile, ServerError> {
    let format = match request.format.as_deref() {
        Some(value) if !value.trim().is_empty() => value
            .parse::<ExportFormat>()
            .map_err(|err| ServerError::bad_request(err.to_string()))?,
        _ => ExportFormat::PlainPdf,
    };
    let kind = parse_kind(request.kind.as_deref())?.unwrap_or(state.settings.artifact_kind);
    Ok(export::export(&request.text, kind, format, &state.pdf)?)
}

/// ASCII-only, so it can be written into a quoted `filename` header parameter.
pub(crate) fn download_stem(name: Option<&str>) -> String {
    let stem = name
        .map(|value| {
            value
                .chars()
                .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
                .collect::<String>()
        })
        .unwrap_or_default();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        "output".to_string()
    } else {
        stem.to_string()
    }
}

fn parse_kind(value: Option<&str>) -> Result<Option<ArtifactKind>, ServerError> {
    match value {
        Some(value) if !value.trim().is_empty() => value
            .parse::<ArtifactKind>()
            .map(Some)
            .map_err(|err| ServerError::bad_request(err.to_string())),
        _ => Ok(None),
    }
}
