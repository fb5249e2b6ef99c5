use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::recognition::command_exists;

use super::UploadError;

/// External renderer used to turn the first page of a PDF into a PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PdfRasterizer {
    Mutool,
    Pdftoppm,
}

impl PdfRasterizer {
    /// Prefers mupdf's `mutool`, then poppler's `pdftoppm`.
    pub(crate) fn detect() -> Option<Self> {
        if command_exists(Path::new("mutool")) {
            Some(Self::Mutool)
        } else if command_exists(Path::new("pdftoppm")) {
            Some(Self::Pdftoppm)
        } else {
            None
        }
    }

    pub(crate) fn program(self) -> &'static str {
        match self {
            PdfRasterizer::Mutool => "mutool",
            PdfRasterizer::Pdftoppm => "pdftoppm",
        }
    }

    /// Arguments rendering page 1 of `input` into `output`, which must end in `.png`.
    pub(crate) fn first_page_args(self, input: &Path, output: &Path, dpi: u32) -> Vec<OsString> {
        match self {
            PdfRasterizer::Mutool => vec![
                "draw".into(),
                "-r".into(),
                dpi.to_string().into(),
                "-o".into(),
                output.as_os_str().to_os_string(),
                input.as_os_str().to_os_string(),
                "1".into(),
            ],
            // pdftoppm appends the extension itself.
            PdfRasterizer::Pdftoppm => vec![
                "-png".into(),
                "-r".into(),
                dpi.to_string().into(),
                "-f".into(),
                "1".into(),
                "-l".into(),
                "1".into(),
                "-singlefile".into(),
                input.as_os_str().to_os_string(),
                output.with_extension("").into_os_string(),
            ],
        }
    }
}

/// Renders page 1 of `pdf` to `target`. The page is rendered into a scratch
/// directory next to `target` and moved into place once complete.
pub(crate) fn render_first_page(pdf: &Path, target: &Path, dpi: u32) -> Result<(), UploadError> {
    let rasterizer = PdfRasterizer::detect().ok_or(UploadError::RendererMissing)?;
    let io_err = |source| UploadError::Io {
        path: target.to_path_buf(),
        source,
    };
    let render_err = |message: String| UploadError::Render {
        name: pdf
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        message,
    };

    let dir = target
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let scratch = tempfile::Builder::new()
        .prefix(".render-")
        .tempdir_in(dir)
        .map_err(io_err)?;
    let rendered = scratch.path().join("page.png");
    let args = rasterizer.first_page_args(pdf, &rendered, dpi);
    debug!("rendering {} with {}", pdf.display(), rasterizer.program());

    let output = Command::new(rasterizer.program())
        .args(&args)
        .output()
        .map_err(|err| render_err(format!("failed to run {}: {}", rasterizer.program(), err)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(render_err(format!(
            "{} failed: {}",
            rasterizer.program(),
            stderr.trim()
        )));
    }
    if !rendered.is_file() {
        return Err(render_err(format!(
            "{} produced no page image",
            rasterizer.program()
        )));
    }
    fs::rename(&rendered, target).map_err(io_err)?;
    Ok(())
}
