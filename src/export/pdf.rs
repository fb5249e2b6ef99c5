use anyhow::{Context, Result, anyhow};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

const MARGIN_MM: f32 = 10.0;
const BOTTOM_MARGIN_MM: f32 = 20.0;
const ROW_HEIGHT_MM: f32 = 10.0;
const LINE_GAP_MM: f32 = 2.0;
const PT_TO_MM: f32 = 25.4 / 72.0;
// Average advance of the builtin sans and serif faces, in em.
const AVG_GLYPH_EM: f32 = 0.5;
const COURIER_GLYPH_EM: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfFont {
    Helvetica,
    Times,
    Courier,
}

impl PdfFont {
    fn builtin(self) -> BuiltinFont {
        match self {
            PdfFont::Helvetica => BuiltinFont::Helvetica,
            PdfFont::Times => BuiltinFont::TimesRoman,
            PdfFont::Courier => BuiltinFont::Courier,
        }
    }

    fn glyph_em(self) -> f32 {
        match self {
            PdfFont::Courier => COURIER_GLYPH_EM,
            _ => AVG_GLYPH_EM,
        }
    }
}

impl FromStr for PdfFont {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "helvetica" | "arial" | "sans" => Ok(PdfFont::Helvetica),
            "times" | "times-roman" | "serif" => Ok(PdfFont::Times),
            "courier" | "mono" => Ok(PdfFont::Courier),
            other => Err(anyhow!(
                "unsupported pdf font '{}' (expected helvetica, times or courier)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrientation {
    Portrait,
    Landscape,
}

impl FromStr for PageOrientation {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "p" | "portrait" => Ok(PageOrientation::Portrait),
            "l" | "landscape" => Ok(PageOrientation::Landscape),
            other => Err(anyhow!(
                "unsupported page orientation '{}' (expected portrait or landscape)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    A3,
    A4,
    A5,
    Letter,
    Legal,
}

impl PageFormat {
    /// Portrait width and height in millimetres.
    fn size_mm(self) -> (f32, f32) {
        match self {
            PageFormat::A3 => (297.0, 420.0),
            PageFormat::A4 => (210.0, 297.0),
            PageFormat::A5 => (148.0, 210.0),
            PageFormat::Letter => (215.9, 279.4),
            PageFormat::Legal => (215.9, 355.6),
        }
    }
}

impl FromStr for PageFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "a3" => Ok(PageFormat::A3),
            "a4" => Ok(PageFormat::A4),
            "a5" => Ok(PageFormat::A5),
            "letter" => Ok(PageFormat::Letter),
            "legal" => Ok(PageFormat::Legal),
            other => Err(anyhow!(
                "unsupported page format '{}' (expected a3, a4, a5, letter or legal)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfOptions {
    pub font: PdfFont,
    /// Points.
    pub font_size: f32,
    pub orientation: PageOrientation,
    pub format: PageFormat,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            font: PdfFont::Helvetica,
            font_size: 12.0,
            orientation: PageOrientation::Portrait,
            format: PageFormat::A4,
        }
    }
}

impl PdfOptions {
    pub fn page_size_mm(&self) -> (f32, f32) {
        let (width, height) = self.format.size_mm();
        match self.orientation {
            PageOrientation::Portrait => (width, height),
            PageOrientation::Landscape => (height, width),
        }
    }

    /// Characters that fit in one row of the usable width.
    pub fn row_capacity(&self) -> usize {
        let (width, _) = self.page_size_mm();
        let usable = width - 2.0 * MARGIN_MM;
        let glyph = self.font_size * PT_TO_MM * self.font.glyph_em();
        ((usable / glyph).floor() as usize).max(1)
    }
}

/// One text row placed on a page; `baseline` is measured from the page bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedRow {
    pub text: String,
    pub x: f32,
    pub baseline: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaidOutPage {
    pub rows: Vec<PlacedRow>,
}

/// Splits `text` into one wrapped cell per input line and flows the rows
/// over as many pages as needed. Always yields at least one page.
pub fn paginate(text: &str, options: &PdfOptions) -> Vec<LaidOutPage> {
    let (_, page_height) = options.page_size_mm();
    let capacity = options.row_capacity();
    let font_mm = options.font_size * PT_TO_MM;
    let bottom_limit = page_height - BOTTOM_MARGIN_MM;

    let mut pages = vec![LaidOutPage::default()];
    let mut cursor = MARGIN_MM;
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        for row in wrap_line(line, capacity) {
            let fresh_page = cursor <= MARGIN_MM;
            if cursor + ROW_HEIGHT_MM > bottom_limit && !fresh_page {
                pages.push(LaidOutPage::default());
                cursor = MARGIN_MM;
            }
            let baseline_from_top = cursor + 0.5 * ROW_HEIGHT_MM + 0.3 * font_mm;
            if let Some(page) = pages.last_mut() {
                page.rows.push(PlacedRow {
                    text: row,
                    x: MARGIN_MM,
                    baseline: page_height - baseline_from_top,
                });
            }
            cursor += ROW_HEIGHT_MM;
        }
        cursor += LINE_GAP_MM;
    }
    pages
}

/// Greedy word wrap; words longer than a row are split across rows.
fn wrap_line(line: &str, capacity: usize) -> Vec<String> {
    let mut rows = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in line.split(' ') {
        let mut word_len = word.chars().count();
        let mut word = word.to_string();
        let needed = if current_len == 0 { word_len } else { current_len + 1 + word_len };
        if needed <= capacity {
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(&word);
            current_len += word_len;
            continue;
        }
        if current_len > 0 {
            rows.push(std::mem::take(&mut current));
        }
        while word_len > capacity {
            let split_at = word
                .char_indices()
                .nth(capacity)
                .map(|(idx, _)| idx)
                .unwrap_or(word.len());
            let rest = word.split_off(split_at);
            rows.push(word);
            word = rest;
            word_len -= capacity;
        }
        current = word;
        current_len = word_len;
    }
    rows.push(current);
    rows
}

#[derive(Debug, Clone, Default)]
pub struct PdfExporter {
    options: PdfOptions,
}

impl PdfExporter {
    pub fn new(options: PdfOptions) -> Self {
        Self { options }
    }

    pub fn render(&self, text: &str) -> Result<Vec<u8>> {
        let pages = paginate(text, &self.options);
        let (width, height) = self.options.page_size_mm();
        let (doc, first_page, first_layer) =
            PdfDocument::new("Recognized text", Mm(width), Mm(height), "Layer 1");
        let font = doc
            .add_builtin_font(self.options.font.builtin())
            .with_context(|| "failed to load pdf font")?;

        for (idx, page) in pages.iter().enumerate() {
            let (page_index, layer_index) = if idx == 0 {
                (first_page, first_layer)
            } else {
                doc.add_page(Mm(width), Mm(height), format!("Layer {}", idx + 1))
            };
            let layer = doc.get_page(page_index).get_layer(layer_index);
            for row in &page.rows {
                if row.text.is_empty() {
                    continue;
                }
                layer.use_text(
                    row.text.clone(),
                    self.options.font_size,
                    Mm(row.x),
                    Mm(row.baseline),
                    &font,
                );
            }
        }

        let mut buffer = Vec::new();
        {
            let mut writer = BufWriter::new(&mut buffer);
            doc.save(&mut writer).with_context(|| "failed to write pdf")?;
        }
        info!("rendered pdf with {} page(s)", pages.len());
        Ok(buffer)
    }

    pub fn write(&self, text: &str, output: &Path) -> Result<PathBuf> {
        let bytes = self.render(text)?;
        if let Some(parent) = output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        fs::write(output, bytes)
            .with_context(|| format!("failed to write pdf: {}", output.display()))?;
        Ok(output.to_path_buf())
    }
}
