pub mod pdf;

use anyhow::{Result, anyhow};
use std::str::FromStr;

use crate::recognition::ArtifactKind;
use pdf::PdfExporter;

pub use pdf::{PageFormat, PageOrientation, PdfFont, PdfOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    PlainTxt,
    PlainPdf,
}

impl ExportFormat {
    pub fn all() -> [ExportFormat; 3] {
        [ExportFormat::Json, ExportFormat::PlainTxt, ExportFormat::PlainPdf]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::PlainTxt => "plain_txt",
            ExportFormat::PlainPdf => "plain_pdf",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::PlainTxt => "text/plain; charset=utf-8",
            ExportFormat::PlainPdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::PlainTxt => "txt",
            ExportFormat::PlainPdf => "pdf",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "plain_txt" | "txt" | "text" => Ok(ExportFormat::PlainTxt),
            "plain_pdf" | "pdf" => Ok(ExportFormat::PlainPdf),
            other => Err(anyhow!(
                "unsupported export format '{}' (expected json, plain_txt or plain_pdf)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

impl ExportedFile {
    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }

    pub fn file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.format.extension())
    }
}

/// Converts recognized content of the given `kind` into `format`.
pub fn export(
    content: &str,
    kind: ArtifactKind,
    format: ExportFormat,
    pdf: &PdfExporter,
) -> Result<ExportedFile> {
    let bytes = match format {
        ExportFormat::PlainTxt => content.as_bytes().to_vec(),
        ExportFormat::Json => match kind {
            ArtifactKind::Json => content.as_bytes().to_vec(),
            ArtifactKind::Text => serde_json::to_vec(&serde_json::json!({ "text": content }))?,
        },
        ExportFormat::PlainPdf => pdf.render(content)?,
    };
    Ok(ExportedFile { format, bytes })
}
