use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

mod render;

use render::render_first_page;

pub const PDF_MIME: &str = "application/pdf";
pub const PNG_MIME: &str = "image/png";

#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_bytes: u64,
    /// Lowercase MIME types accepted by the store.
    pub allowed: Vec<String>,
    /// Resolution the first page of an uploaded PDF is rendered at.
    pub pdf_dpi: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub name: String,
    pub mime: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Name of the PDF this page image was rendered from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload file name: '{name}'")]
    InvalidName { name: String },
    #[error("uploaded file is empty")]
    Empty,
    #[error("uploaded file is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("unsupported file type '{mime}'")]
    UnsupportedType { mime: String },
    #[error("upload not found: {name}")]
    Missing { name: String },
    #[error("pdf rendering requires mutool or pdftoppm (install mupdf or poppler)")]
    RendererMissing,
    #[error("failed to render first page of {name}: {message}")]
    Render { name: String, message: String },
    #[error("failed to store upload {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UploadError {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidName { .. } => "invalid_name",
            UploadError::Empty => "empty_upload",
            UploadError::TooLarge { .. } => "too_large",
            UploadError::UnsupportedType { .. } => "unsupported_type",
            UploadError::Missing { .. } => "upload_missing",
            UploadError::RendererMissing => "pdf_renderer_missing",
            UploadError::Render { .. } => "pdf_render_failure",
            UploadError::Io { .. } => "io_failure",
        }
    }
}

/// Persists uploads as `<root>/<original base name>`. A PDF is kept as
/// uploaded and its first page is rendered to `<root>/<stem>.png`.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    limits: UploadLimits,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, limits: UploadLimits) -> Self {
        Self {
            root: root.into(),
            limits,
        }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Stores `bytes` and returns the file the recognizer should read: the
    /// upload itself, or the rendered first page for a PDF.
    pub fn store(&self, original_name: &str, bytes: &[u8]) -> Result<StoredUpload, UploadError> {
        let name = sanitize_name(original_name)?;
        let size = bytes.len() as u64;
        if size == 0 {
            return Err(UploadError::Empty);
        }
        if size > self.limits.max_bytes {
            return Err(UploadError::TooLarge {
                size,
                limit: self.limits.max_bytes,
            });
        }
        let mime = detect_mime(bytes, Path::new(&name)).unwrap_or("application/octet-stream");
        self.check_allowed(mime)?;

        let path = self.root.join(&name);
        write_atomic(&self.root, &path, bytes)?;
        info!("stored upload {} ({}, {} bytes)", path.display(), mime, size);

        if mime == PDF_MIME {
            return self.render_page(&path, &name);
        }
        describe(path, name, mime, None)
    }

    /// Looks up a stored upload by its exact name and re-checks its content
    /// against the allow-list. A PDF resolves to its rendered first page.
    pub fn open(&self, name: &str) -> Result<StoredUpload, UploadError> {
        let name = plain_name(name)?;
        let path = self.root.join(&name);
        if !path.is_file() {
            return Err(UploadError::Missing { name });
        }
        let mime = detect_file_mime(&path)?;
        self.check_allowed(mime)?;
        if mime == PDF_MIME {
            let page = self.root.join(page_image_name(&name));
            if page.is_file() && detect_file_mime(&page)? == PNG_MIME {
                return describe(page, page_image_name(&name), PNG_MIME, Some(name));
            }
            return self.render_page(&path, &name);
        }
        describe(path, name, mime, None)
    }

    fn check_allowed(&self, mime: &str) -> Result<(), UploadError> {
        if self.limits.allowed.iter().any(|allowed| allowed == mime) {
            Ok(())
        } else {
            Err(UploadError::UnsupportedType {
                mime: mime.to_string(),
            })
        }
    }

    fn render_page(&self, pdf: &Path, name: &str) -> Result<StoredUpload, UploadError> {
        let page_name = page_image_name(name);
        let page = self.root.join(&page_name);
        render_first_page(pdf, &page, self.limits.pdf_dpi)?;
        info!("rendered first page of {} to {}", pdf.display(), page.display());
        describe(page, page_name, PNG_MIME, Some(name.to_string()))
    }
}

fn describe(
    path: PathBuf,
    name: String,
    mime: &str,
    source: Option<String>,
) -> Result<StoredUpload, UploadError> {
    let size = fs::metadata(&path)
        .map_err(|source| UploadError::Io {
            path: path.clone(),
            source,
        })?
        .len();
    let (width, height) = match image_dimensions(&path, mime) {
        Some((width, height)) => (Some(width), Some(height)),
        None => (None, None),
    };
    Ok(StoredUpload {
        path,
        name,
        mime: mime.to_string(),
        size,
        width,
        height,
        source,
    })
}

/// `<stem>.png`, or `<name>.png` when the PDF itself is named `*.png`.
fn page_image_name(pdf_name: &str) -> String {
    let stem = Path::new(pdf_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| pdf_name.to_string());
    let page = format!("{}.png", stem);
    if page == pdf_name {
        format!("{}.png", pdf_name)
    } else {
        page
    }
}

/// Keeps the base name of a client-supplied file name.
fn sanitize_name(original: &str) -> Result<String, UploadError> {
    let base = original.rsplit(['/', '\\']).next().unwrap_or("");
    plain_name(base).map_err(|_| UploadError::InvalidName {
        name: original.to_string(),
    })
}

/// Accepts only a bare file name. A leading `-` is refused so the name can
/// never be read as an option by the tools it is passed to.
fn plain_name(name: &str) -> Result<String, UploadError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.starts_with('-')
        || trimmed.starts_with(".render-")
        || trimmed.starts_with(".upload-")
        || trimmed.contains(['/', '\\', '\0'])
    {
        return Err(UploadError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), UploadError> {
    let io_err = |source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut file = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(dir)
        .map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

fn image_dimensions(path: &Path, mime: &str) -> Option<(u32, u32)> {
    if !mime.starts_with("image/") {
        return None;
    }
    image::image_dimensions(path).ok()
}

/// Sniffs the MIME type from magic bytes, falling back to the extension.
pub fn detect_mime(bytes: &[u8], path: &Path) -> Option<&'static str> {
    if let Some(kind) = infer::get(bytes) {
        return Some(kind.mime_type());
    }
    mime_from_path(path)
}

fn detect_file_mime(path: &Path) -> Result<&'static str, UploadError> {
    let sniffed = infer::get_from_path(path).map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(sniffed
        .map(|kind| kind.mime_type())
        .or_else(|| mime_from_path(path))
        .unwrap_or("application/octet-stream"))
}

fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())?;
    mime_from_extension(&ext)
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "pdf" => Some(PDF_MIME),
        "png" => Some(PNG_MIME),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "tiff" | "tif" => Some("image/tiff"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "txt" => Some("text/plain"),
        "json" => Some("application/json"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::pdf::{PdfExporter, PdfOptions};
    use super::render::PdfRasterizer;
    use tempfile::tempdir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbaImage::new(width, height);
        let mut buffer = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("encode png");
        buffer.into_inner()
    }

    fn pdf_bytes() -> Vec<u8> {
        PdfExporter::new(PdfOptions::default())
            .render("Kjære Ola")
            .expect("render pdf")
    }

    fn limits() -> UploadLimits {
        UploadLimits {
            max_bytes: 64 * 1024,
            allowed: vec![
                "image/jpeg".to_string(),
                PNG_MIME.to_string(),
                "image/tiff".to_string(),
                PDF_MIME.to_string(),
            ],
            pdf_dpi: 72,
        }
    }

    fn renderer_installed() -> bool {
        let found = PdfRasterizer::detect().is_some();
        if !found {
            eprintln!("skipping: neither mutool nor pdftoppm is installed");
        }
        found
    }

    #[test]
    fn stores_png_under_original_name() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path().join("uploads"), limits());
        let png = png_bytes(3, 2);
        let stored = store.store("page3.png", &png).expect("store png");
        assert_eq!(stored.path, dir.path().join("uploads/page3.png"));
        assert_eq!(stored.name, "page3.png");
        assert_eq!(stored.mime, "image/png");
        assert_eq!(stored.size, png.len() as u64);
        assert_eq!((stored.width, stored.height), (Some(3), Some(2)));
        assert_eq!(stored.source, None);
        assert_eq!(fs::read(&stored.path).expect("read back"), png);
    }

    #[test]
    fn same_name_overwrites_previous_upload() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path(), limits());
        store.store("page.png", &png_bytes(1, 1)).expect("first");
        let stored = store.store("page.png", &png_bytes(4, 5)).expect("second");
        assert_eq!((stored.width, stored.height), (Some(4), Some(5)));
        assert_eq!(fs::read(&stored.path).expect("read"), png_bytes(4, 5));
    }

    #[test]
    fn directory_components_are_dropped_from_names() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path().join("uploads"), limits());
        let stored = store.store("../../etc/page.png", &png_bytes(1, 1)).expect("store");
        assert_eq!(stored.path, dir.path().join("uploads/page.png"));
        let stored = store.store("C:\\scans\\page2.png", &png_bytes(1, 1)).expect("store");
        assert_eq!(stored.name, "page2.png");
    }

    #[test]
    fn unusable_names_are_rejected() {
        let store = UploadStore::new("uploads", limits());
        for name in ["", "  ", ".", "..", "scans/", "a/..", "--help.png", ".upload-x.png"] {
            let err = store.store(name, &png_bytes(1, 1)).unwrap_err();
            assert_eq!(err.kind(), "invalid_name", "name: {name:?}");
        }
    }

    #[test]
    fn text_files_are_unsupported() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path(), limits());
        let err = store.store("notes.txt", b"hello").unwrap_err();
        match err {
            UploadError::UnsupportedType { mime } => assert_eq!(mime, "text/plain"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dir.path().join("notes.txt").exists());
    }

    #[test]
    fn extension_is_not_trusted_over_content() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path(), limits());
        let stored = store.store("actually-png.jpg", &png_bytes(1, 1)).expect("store");
        assert_eq!(stored.mime, "image/png");
    }

    #[test]
    fn size_limit_and_empty_files() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path(), limits());
        let big = vec![0u8; 128 * 1024];
        let err = store.store("big.png", &big).unwrap_err();
        assert!(matches!(
            err,
            UploadError::TooLarge {
                size: 131072,
                limit: 65536
            }
        ));
        let err = store.store("empty.png", &[]).unwrap_err();
        assert_eq!(err.kind(), "empty_upload");
    }

    #[test]
    fn open_requires_a_bare_stored_name() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path().join("uploads"), limits());
        store.store("page3.png", &png_bytes(2, 2)).expect("store");

        let opened = store.open("page3.png").expect("open");
        assert_eq!(opened.path, dir.path().join("uploads/page3.png"));
        assert_eq!((opened.width, opened.height), (Some(2), Some(2)));

        for name in ["/etc/passwd", "../uploads/page3.png", "batch/page3.png", "--help.txt", ""] {
            let err = store.open(name).unwrap_err();
            assert_eq!(err.kind(), "invalid_name", "name: {name:?}");
        }
        assert_eq!(store.open("page4.png").unwrap_err().kind(), "upload_missing");
    }

    #[test]
    fn open_rechecks_the_allow_list() {
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path(), limits());
        fs::write(dir.path().join("notes.txt"), "placed by hand").expect("write");
        fs::write(dir.path().join("fake.png"), "not an image").expect("write");
        assert_eq!(store.open("notes.txt").unwrap_err().kind(), "unsupported_type");
        // Falls back to the extension when the content has no signature.
        assert_eq!(store.open("fake.png").expect("open").mime, PNG_MIME);
    }

    #[test]
    fn pdf_uploads_are_rendered_to_a_page_image() {
        if !renderer_installed() {
            return;
        }
        let dir = tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path().join("uploads"), limits());
        let stored = store.store("letter.pdf", &pdf_bytes()).expect("store pdf");
        assert_eq!(stored.name, "letter.png");
        assert_eq!(stored.path, dir.path().join("uploads/letter.png"));
        assert_eq!(stored.mime, PNG_MIME);
        assert_eq!(stored.source.as_deref(), Some("letter.pdf"));
        assert!(stored.width.is_some());
        assert!(dir.path().join("uploads/letter.pdf").is_file());

        let opened = store.open("letter.pdf").expect("open pdf");
        assert_eq!(opened.path, stored.path);
        assert_eq!(opened.source.as_deref(), Some("letter.pdf"));
    }

    #[test]
    fn page_image_names_never_collide_with_the_pdf() {
        assert_eq!(page_image_name("letter.pdf"), "letter.png");
        assert_eq!(page_image_name("scan"), "scan.png");
        assert_eq!(page_image_name("odd.png"), "odd.png.png");
    }
}
