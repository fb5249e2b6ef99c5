use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct RecognizeRequest {
    /// Name of a file previously stored through `/upload`.
    pub(crate) filename: Option<String>,
    pub(crate) kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RecognizeResponse {
    pub(crate) image: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) source: Option<String>,
    pub(crate) artifact: PathBuf,
    pub(crate) kind: String,
    pub(crate) content: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct ExportRequest {
    pub(crate) text: String,
    pub(crate) format: Option<String>,
    pub(crate) kind: Option<String>,
    /// Download name without extension.
    pub(crate) name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) tool: String,
    pub(crate) tool_available: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SettingsInfo {
    pub(crate) accepted_types: Vec<String>,
    pub(crate) max_upload_bytes: u64,
    pub(crate) artifact_kind: String,
    pub(crate) export_formats: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
    pub(crate) kind: String,
}
