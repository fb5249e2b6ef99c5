use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

use crate::settings;
use crate::upload::StoredUpload;

use super::models::{ExportRequest, HealthResponse, RecognizeRequest, RecognizeResponse, SettingsInfo};
use super::page::render_index;
use super::requests::{ServerError, download_stem, export_request, recognize_request, upload_request};
use super::state::ServerState;
use crate::export::ExportFormat;

// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

pub async fn run_server(settings: settings::Settings, addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(|| settings.server_addr.clone());
    let state = Arc::new(ServerState::from_settings(settings)?);
    if !state.adapter.tool_available() {
        warn!(
            "recognition tool '{}' was not found; recognition requests will fail",
            state.adapter.config().tool.display()
        );
    }
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address: {}", addr))?;
    info!("listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub(crate) fn router(state: Arc<ServerState>) -> Router {
    let body_limit = usize::try_from(
        state
            .uploads
            .limits()
            .max_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES),
    )
    .unwrap_or(usize::MAX);
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/settings", get(settings_info))
        .route("/upload", post(upload))
        .route("/recognize", post(recognize))
        .route("/export", post(export))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn index(State(state): State<Arc<ServerState>>) -> Result<Html<String>, ServerError> {
    Ok(Html(render_index(&state)?))
}

pub(crate) async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tool: state.adapter.config().tool.display().to_string(),
        tool_available: state.adapter.tool_available(),
    })
}

pub(crate) async fn settings_info(State(state): State<Arc<ServerState>>) -> Json<SettingsInfo> {
    let limits = state.uploads.limits();
    Json(SettingsInfo {
        accepted_types: limits.allowed.clone(),
        max_upload_bytes: limits.max_bytes,
        artifact_kind: state.settings.artifact_kind.to_string(),
        export_formats: ExportFormat::all()
            .iter()
            .map(|format| format.as_str().to_string())
            .collect(),
    })
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type"),
    );
}

async fn upload(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Result<Json<StoredUpload>, ServerError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(multipart_error)?;
        let stored =
            blocking(state.clone(), move |state| upload_request(state, &name, &bytes)).await?;
        return Ok(Json(stored));
    }
    Err(ServerError::bad_request("no file uploaded"))
}

async fn recognize(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<RecognizeRequest>,
) -> Result<Json<RecognizeResponse>, ServerError> {
    let response = blocking(state, move |state| recognize_request(state, payload)).await?;
    Ok(Json(response))
}

async fn export(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<ExportRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let stem = download_stem(payload.name.as_deref());
    let file = blocking(state, move |state| export_request(state, &payload)).await?;
    let disposition = format!("attachment; filename=\"{}\"", file.file_name(&stem));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|err| ServerError::internal(format!("invalid download name: {}", err)))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(file.mime())),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    ))
}

/// Runs filesystem and subprocess work off the async executor.
async fn blocking<T, F>(state: Arc<ServerState>, work: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce(&ServerState) -> Result<T, ServerError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(state.as_ref()))
        .await
        .map_err(|err| ServerError::internal(format!("server task failed: {}", err)))?
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ServerError {
    let status = err.status();
    ServerError {
        status,
        kind: if status == StatusCode::PAYLOAD_TOO_LARGE {
            "too_large"
        } else {
            "bad_upload"
        },
        message: err.body_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::Value;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    const BOUNDARY: &str = "forsete-boundary";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, file_name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn png_bytes() -> Vec<u8> {
        let image = image::RgbaImage::new(2, 3);
        let mut buffer = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("encode png");
        buffer.into_inner()
    }

    fn upload_state(dir: &TempDir, max_bytes: u64) -> Arc<ServerState> {
        let settings = Settings {
            upload_root: dir.path().join("uploads"),
            output_root: dir.path().join("outputs"),
            upload_max_bytes: max_bytes,
            ..Settings::default()
        };
        Arc::new(ServerState::from_settings(settings).expect("state"))
    }

    async fn post_upload(state: Arc<ServerState>, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request");
        let response = router(state).oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).expect("json body");
        (status, json)
    }

    #[tokio::test]
    async fn upload_stores_the_first_named_file() {
        let dir = tempdir().expect("tempdir");
        let png = png_bytes();
        let body = multipart_body(&[
            Part::Text("note", "not a file"),
            Part::File("document", "page3.png", &png),
            Part::File("document", "second.png", &png),
        ]);
        let (status, json) = post_upload(upload_state(&dir, 1024 * 1024), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "page3.png");
        assert_eq!(json["mime"], "image/png");
        assert_eq!(json["width"], 2);
        assert_eq!(json["height"], 3);
        assert!(dir.path().join("uploads/page3.png").is_file());
        assert!(!dir.path().join("uploads/second.png").exists());
    }

    #[tokio::test]
    async fn upload_without_a_file_is_a_bad_request() {
        let dir = tempdir().expect("tempdir");
        let body = multipart_body(&[Part::Text("note", "no file here")]);
        let (status, json) = post_upload(upload_state(&dir, 1024 * 1024), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "bad_request");
        assert_eq!(json["error"], "no file uploaded");
    }

    #[tokio::test]
    async fn upload_over_the_store_limit_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let big = vec![0u8; 2048];
        let body = multipart_body(&[Part::File("document", "big.png", &big)]);
        let (status, json) = post_upload(upload_state(&dir, 1024), body).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["kind"], "too_large");
    }

    #[tokio::test]
    async fn upload_over_the_body_limit_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let big = vec![0u8; 256 * 1024];
        let body = multipart_body(&[Part::File("document", "big.png", &big)]);
        let (status, json) = post_upload(upload_state(&dir, 1024), body).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["kind"], "too_large");
        assert!(!dir.path().join("uploads/big.png").exists());
    }

    #[tokio::test]
    async fn unsupported_upload_type_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let body = multipart_body(&[Part::File("document", "notes.txt", b"plain words")]);
        let (status, json) = post_upload(upload_state(&dir, 1024 * 1024), body).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json["kind"], "unsupported_type");
    }

    #[tokio::test]
    async fn export_sets_download_headers() {
        let dir = tempdir().expect("tempdir");
        let request = Request::builder()
            .method(Method::POST)
            .uri("/export")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"text": "hello", "format": "plain_txt", "name": "brev_Åse"}"#,
            ))
            .expect("request");
        let response = router(upload_state(&dir, 1024))
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"brev_se.txt\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn health_reports_missing_tool() {
        let settings = Settings {
            tool: "forsete-htr-missing-tool".into(),
            ..Settings::default()
        };
        let state = Arc::new(ServerState::from_settings(settings).expect("state"));
        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.tool, "forsete-htr-missing-tool");
        assert!(!body.tool_available);
    }

    #[tokio::test]
    async fn settings_info_snapshot() {
        let state = Arc::new(ServerState::from_settings(Settings::default()).expect("state"));
        let Json(body) = settings_info(State(state)).await;
        insta::assert_json_snapshot!(body, @r###"
        {
          "accepted_types": [
            "image/jpeg",
            "image/png",
            "image/tiff",
            "application/pdf"
          ],
          "max_upload_bytes": 33554432,
          "artifact_kind": "txt",
          "export_formats": [
            "json",
            "plain_txt",
            "plain_pdf"
          ]
        }
        "###);
    }
}
