//! Backend traits for the page text layer, rasterization and OCR
//!
//! The extractors only see these traits, so tests drive the whole pipeline
//! with in-memory stubs and production wires in pdfium + tesseract.

use crate::error::ExtractionResult;
use crate::types::BoundingBox;
use image::DynamicImage;
use std::path::Path;

/// A run of text from the PDF text layer, top-left origin, PDF points
#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    pub bbox: BoundingBox,
}

impl TextSegment {
    pub fn new(text: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

/// One recognized word with the engine's layout identity
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
    /// Engine confidence, 0-100 (negative when the engine reports none)
    pub confidence: f32,
}

impl OcrWord {
    /// Physical line this word belongs to
    pub fn line_key(&self) -> (u32, u32, u32) {
        (self.block, self.paragraph, self.line)
    }
}

/// Embedded text layer of a PDF page (1-indexed pages)
///
/// Implementations must return `CatastrophicIo` when the document cannot be
/// opened and `PageOutOfRange` for a bad page number. A page without text is
/// `Ok(vec![])`.
pub trait TextLayerSource {
    fn text_segments(&self, pdf: &Path, page: u32) -> ExtractionResult<Vec<TextSegment>>;

    /// Backend identifier for logging/debugging
    fn name(&self) -> &str;
}

/// Renders one page at a given resolution
pub trait PageRasterizer {
    fn rasterize(&self, pdf: &Path, page: u32, dpi: u32) -> ExtractionResult<DynamicImage>;

    fn name(&self) -> &str;
}

/// Optical character recognition over a rendered page
pub trait OcrEngine {
    fn recognize(&self, image: &DynamicImage, dpi: u32) -> ExtractionResult<Vec<OcrWord>>;

    fn name(&self) -> &str;

    /// Check if the engine is installed and runnable
    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(feature = "pdfium-backend")]
pub mod pdfium;

#[cfg(feature = "pdfium-backend")]
pub use pdfium::PdfiumBackend;

pub mod tesseract;

pub use tesseract::TesseractCli;
