//! Text extraction from menu documents.
//!
//! A document is either a single image, OCRed directly, or a multi-page PDF,
//! rasterized page by page. Page boundaries are carried as a structured
//! [`PageSet`] rather than a sentinel substring; the form-feed delimiter only
//! exists inside the storage codec, and is stripped from page content before
//! encoding so it can never collide with document text.

pub mod pdf;
pub mod tesseract;

use self::{pdf::PdfRasterizer, tesseract::TextExtractor};
use crate::prelude::*;

/// Page delimiter used when flattening a [`PageSet`] into the `raw_text`
/// column. Form feed is also what tesseract emits between pages, so the
/// parsing side treats it as a page break no matter who produced it.
pub const PAGE_DELIMITER: char = '\u{0C}';

/// What kind of document are we extracting from?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    /// A single image (PNG/JPEG).
    Image,
    /// A multi-page PDF.
    Pdf,
}

impl DocumentKind {
    /// Determine the document kind from a filename extension.
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("file extension missing on {:?}", filename))?;
        match extension.as_str() {
            "png" | "jpg" | "jpeg" => Ok(DocumentKind::Image),
            "pdf" => Ok(DocumentKind::Pdf),
            other => Err(anyhow!(
                "file type .{} not supported (PDF, PNG, JPG, JPEG only)",
                other
            )),
        }
    }
}

/// Extracted text, one entry per page, in page order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageSet {
    pages: Vec<String>,
}

impl PageSet {
    /// A single-page document.
    pub fn single(text: String) -> Self {
        Self { pages: vec![text] }
    }

    /// A multi-page document. Pages that failed OCR should already have been
    /// dropped by the caller.
    pub fn from_pages(pages: Vec<String>) -> Self {
        Self { pages }
    }

    /// The pages, in page order.
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    /// Did this document have more than one page of extracted text?
    pub fn is_multipage(&self) -> bool {
        self.pages.len() > 1
    }

    /// Flatten to the stored `raw_text` form. The delimiter is stripped from
    /// page content first, so decoding always recovers the page structure.
    pub fn to_raw_text(&self) -> String {
        self.pages
            .iter()
            .map(|page| page.replace(PAGE_DELIMITER, ""))
            .collect::<Vec<_>>()
            .join(&PAGE_DELIMITER.to_string())
    }

    /// Recover the page structure from a stored `raw_text` value.
    pub fn from_raw_text(raw_text: &str) -> Self {
        Self {
            pages: raw_text.split(PAGE_DELIMITER).map(|p| p.to_owned()).collect(),
        }
    }

    /// All page text joined for human-readable use.
    pub fn joined(&self) -> String {
        self.pages.join("\n\n")
    }
}

/// Extract text from a downloaded document.
///
/// For PDFs, each page is rasterized and OCRed independently, in page order.
/// A page that fails OCR is skipped with a warning rather than failing the
/// whole document; only zero pages yielding text is an extraction failure.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), ?kind))]
pub async fn extract_document(
    path: &Path,
    kind: DocumentKind,
    extractor: &dyn TextExtractor,
    rasterizer: &dyn PdfRasterizer,
    scratch_dir: &Path,
) -> Result<PageSet> {
    match kind {
        DocumentKind::Image => {
            let text = extractor.extract_text(path).await?;
            Ok(PageSet::single(text))
        }
        DocumentKind::Pdf => {
            let page_images = rasterizer.rasterize(path, scratch_dir).await?;
            let mut pages = Vec::new();
            for (page_idx, image_path) in page_images.iter().enumerate() {
                match extractor.extract_text(image_path).await {
                    Ok(text) => pages.push(text),
                    Err(err) => {
                        warn!(
                            page = page_idx + 1,
                            "skipping page that failed OCR: {:#}", err
                        );
                    }
                }
            }
            if pages.iter().all(|p| p.trim().is_empty()) {
                return Err(anyhow!(
                    "no pages of {:?} yielded any text",
                    path.display()
                ));
            }
            Ok(PageSet::from_pages(pages))
        }
    }
}
