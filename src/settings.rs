use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::export::pdf::{PageFormat, PageOrientation, PdfFont, PdfOptions};
use crate::paths;
use crate::recognition::{ArtifactKind, RecognizerConfig};
use crate::upload::UploadLimits;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub tool: PathBuf,
    pub pipeline_config: PathBuf,
    pub output_root: PathBuf,
    pub artifact_kind: ArtifactKind,
    pub upload_root: PathBuf,
    pub upload_max_bytes: u64,
    pub upload_allowed: Vec<String>,
    pub upload_pdf_dpi: u32,
    pub pdf_font: String,
    pub pdf_font_size: f32,
    pub pdf_orientation: String,
    pub pdf_format: String,
    pub pdf_output: PathBuf,
    pub server_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("htrflow"),
            pipeline_config: PathBuf::from("config/pipeline.yaml"),
            output_root: PathBuf::from("outputs"),
            artifact_kind: ArtifactKind::Text,
            upload_root: PathBuf::from("uploads"),
            upload_max_bytes: 32 * 1024 * 1024,
            upload_allowed: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/tiff".to_string(),
                "application/pdf".to_string(),
            ],
            upload_pdf_dpi: 300,
            pdf_font: "Helvetica".to_string(),
            pdf_font_size: 12.0,
            pdf_orientation: "portrait".to_string(),
            pdf_format: "A4".to_string(),
            pdf_output: PathBuf::from("outputs/output.pdf"),
            server_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    pipeline: Option<PipelineSettings>,
    upload: Option<UploadSettings>,
    pdf: Option<PdfSettings>,
    server: Option<ServerSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSettings {
    tool: Option<String>,
    config: Option<String>,
    output_root: Option<String>,
    artifact: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadSettings {
    root: Option<String>,
    max_bytes: Option<u64>,
    allowed: Option<Vec<String>>,
    pdf_dpi: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PdfSettings {
    font: Option<String>,
    font_size: Option<f32>,
    orientation: Option<String>,
    format: Option<String>,
    output: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    addr: Option<String>,
}

/// Loads settings from the built-in defaults and every settings layer that
/// exists, in increasing priority. `extra_path` must exist when given.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(dir) = paths::settings_dir() {
        ordered_paths.push(dir.join("settings.toml"));
        ordered_paths.push(dir.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    load_settings_from(&ordered_paths)
}

fn load_settings_from(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults)?;

    for path in paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings
                .merge(parsed)
                .with_context(|| format!("invalid settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(pipeline) = incoming.pipeline {
            if let Some(tool) = non_blank(pipeline.tool) {
                self.tool = paths::expand_path(&tool);
            }
            if let Some(config) = non_blank(pipeline.config) {
                self.pipeline_config = paths::expand_path(&config);
            }
            if let Some(root) = non_blank(pipeline.output_root) {
                self.output_root = paths::expand_path(&root);
            }
            if let Some(artifact) = non_blank(pipeline.artifact) {
                self.artifact_kind = artifact.parse()?;
            }
        }
        if let Some(upload) = incoming.upload {
            if let Some(root) = non_blank(upload.root) {
                self.upload_root = paths::expand_path(&root);
            }
            if let Some(limit) = upload.max_bytes {
                if limit > 0 {
                    self.upload_max_bytes = limit;
                }
            }
            if let Some(allowed) = upload.allowed {
                let allowed = allowed
                    .into_iter()
                    .map(|mime| mime.trim().to_lowercase())
                    .filter(|mime| !mime.is_empty())
                    .collect::<Vec<_>>();
                if !allowed.is_empty() {
                    self.upload_allowed = allowed;
                }
            }
            if let Some(dpi) = upload.pdf_dpi {
                if dpi > 0 {
                    self.upload_pdf_dpi = dpi;
                }
            }
        }
        if let Some(pdf) = incoming.pdf {
            if let Some(font) = non_blank(pdf.font) {
                self.pdf_font = font;
            }
            if let Some(size) = pdf.font_size {
                if size > 0.0 {
                    self.pdf_font_size = size;
                }
            }
            if let Some(orientation) = non_blank(pdf.orientation) {
                self.pdf_orientation = orientation;
            }
            if let Some(format) = non_blank(pdf.format) {
                self.pdf_format = format;
            }
            if let Some(output) = non_blank(pdf.output) {
                self.pdf_output = paths::expand_path(&output);
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = non_blank(server.addr) {
                self.server_addr = addr;
            }
        }
        Ok(())
    }

    pub fn recognizer_config(&self) -> RecognizerConfig {
        RecognizerConfig {
            tool: self.tool.clone(),
            pipeline_config: self.pipeline_config.clone(),
            output_root: self.output_root.clone(),
            artifact_kind: self.artifact_kind,
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_bytes: self.upload_max_bytes,
            allowed: self.upload_allowed.clone(),
            pdf_dpi: self.upload_pdf_dpi,
        }
    }

    pub fn pdf_options(&self) -> Result<PdfOptions> {
        Ok(PdfOptions {
            font: self.pdf_font.parse::<PdfFont>()?,
            font_size: self.pdf_font_size,
            orientation: self.pdf_orientation.parse::<PageOrientation>()?,
            format: self.pdf_format.parse::<PageFormat>()?,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_embedded_settings_file() {
        let settings = load_settings_from(&[]).expect("load defaults");
        assert_eq!(settings.tool, PathBuf::from("htrflow"));
        assert_eq!(settings.pipeline_config, PathBuf::from("config/pipeline.yaml"));
        assert_eq!(settings.output_root, PathBuf::from("outputs"));
        assert_eq!(settings.artifact_kind, ArtifactKind::Text);
        assert_eq!(settings.upload_root, PathBuf::from("uploads"));
        assert_eq!(settings.upload_max_bytes, 32 * 1024 * 1024);
        assert_eq!(settings.upload_allowed.len(), 4);
        assert_eq!(settings.upload_pdf_dpi, 300);
        assert_eq!(settings.pdf_output, PathBuf::from("outputs/output.pdf"));
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path().join("settings.toml");
        let local = dir.path().join("settings.local.toml");
        fs::write(
            &base,
            "[pipeline]\ntool = \"/opt/htr/bin/htrflow\"\nartifact = \"json\"\n[server]\naddr = \"0.0.0.0:8080\"\n",
        )
        .expect("write base");
        fs::write(&local, "[pipeline]\nartifact = \"txt\"\n[upload]\nmax_bytes = 1024\npdf_dpi = 150\n")
            .expect("write local");

        let settings = load_settings_from(&[base, local]).expect("load layers");
        assert_eq!(settings.tool, PathBuf::from("/opt/htr/bin/htrflow"));
        assert_eq!(settings.artifact_kind, ArtifactKind::Text);
        assert_eq!(settings.upload_max_bytes, 1024);
        assert_eq!(settings.upload_limits().pdf_dpi, 150);
        assert_eq!(settings.server_addr, "0.0.0.0:8080");
    }

    #[test]
    fn blank_values_and_zero_limits_are_ignored() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "[pipeline]\ntool = \"  \"\n[upload]\nmax_bytes = 0\nallowed = []\n[pdf]\nfont_size = 0.0\n",
        )
        .expect("write settings");

        let settings = load_settings_from(&[path]).expect("load settings");
        assert_eq!(settings.tool, PathBuf::from("htrflow"));
        assert_eq!(settings.upload_max_bytes, 32 * 1024 * 1024);
        assert_eq!(settings.upload_allowed.len(), 4);
        assert_eq!(settings.pdf_font_size, 12.0);
    }

    #[test]
    fn unknown_artifact_kind_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[pipeline]\nartifact = \"xml\"\n").expect("write settings");
        let err = load_settings_from(&[path]).unwrap_err();
        assert!(format!("{:#}", err).contains("xml"));
    }

    #[test]
    fn missing_extra_settings_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let err = load_settings(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("settings file not found"));
    }

    #[test]
    fn default_pdf_options_parse() {
        let options = Settings::default().pdf_options().expect("pdf options");
        assert_eq!(options.font, PdfFont::Helvetica);
        assert_eq!(options.orientation, PageOrientation::Portrait);
        assert_eq!(options.format, PageFormat::A4);
    }
}
