//! pdfium backend: text layer segments and page rasterization
//!
//! Binds to `libpdfium` next to the executable, falling back to the system
//! library. Each call opens the document, works on a single page and drops
//! the document before returning, so no handle outlives the call.

use super::{PageRasterizer, TextLayerSource, TextSegment};
use crate::error::{ExtractionError, ExtractionResult};
use crate::types::BoundingBox;
use anyhow::Context;
use image::{DynamicImage, RgbaImage};
use pdfium_render::prelude::*;
use std::path::Path;

/// PDF points per inch
const POINTS_PER_INCH: f32 = 72.0;

pub struct PdfiumBackend {
    pdfium: Pdfium,
}

impl PdfiumBackend {
    pub fn new() -> anyhow::Result<Self> {
        let pdfium = Pdfium::new(
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .context("Failed to bind pdfium library")?,
        );
        Ok(Self { pdfium })
    }

    fn open<'a>(&'a self, pdf: &Path) -> ExtractionResult<PdfDocument<'a>> {
        self.pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| ExtractionError::catastrophic(pdf, e))
    }

    /// Zero-based index of a 1-indexed page number
    fn page_index(document: &PdfDocument, page: u32) -> ExtractionResult<u32> {
        let page_count = document.pages().len() as u32;
        if page == 0 || page > page_count {
            return Err(ExtractionError::PageOutOfRange { page, page_count });
        }
        Ok(page - 1)
    }
}

fn page_load_error(page: u32, e: PdfiumError) -> ExtractionError {
    ExtractionError::SourceUnavailable(format!("cannot load page {page}: {e}"))
}

impl TextLayerSource for PdfiumBackend {
    fn text_segments(&self, pdf: &Path, page: u32) -> ExtractionResult<Vec<TextSegment>> {
        let document = self.open(pdf)?;
        let index = Self::page_index(&document, page)?;
        let pdf_page = document
            .pages()
            .get(index as _)
            .map_err(|e| page_load_error(page, e))?;
        let page_height = pdf_page.height().value;

        let text = pdf_page
            .text()
            .map_err(|e| ExtractionError::SourceUnavailable(format!("no text layer: {e}")))?;

        let mut segments = Vec::new();
        for segment in text.segments().iter() {
            let content = segment.text();
            let content = content.trim();
            if content.is_empty() {
                continue;
            }

            // PDF space is bottom-left origin; flip to top-left
            let bounds = segment.bounds();
            let bbox = BoundingBox {
                x: bounds.left().value,
                y: page_height - bounds.top().value,
                width: bounds.right().value - bounds.left().value,
                height: bounds.top().value - bounds.bottom().value,
            };
            segments.push(TextSegment::new(content, bbox));
        }

        tracing::debug!("pdfium: page {} has {} text segments", page, segments.len());
        Ok(segments)
    }

    fn name(&self) -> &str {
        "pdfium"
    }
}

impl PageRasterizer for PdfiumBackend {
    fn rasterize(&self, pdf: &Path, page: u32, dpi: u32) -> ExtractionResult<DynamicImage> {
        let document = self.open(pdf)?;
        let index = Self::page_index(&document, page)?;
        let pdf_page = document
            .pages()
            .get(index as _)
            .map_err(|e| page_load_error(page, e))?;

        let scale = dpi as f32 / POINTS_PER_INCH;
        let pixel_width = (pdf_page.width().value * scale) as i32;
        let pixel_height = (pdf_page.height().value * scale) as i32;

        let bitmap = pdf_page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(pixel_width)
                    .set_target_height(pixel_height)
                    .render_form_data(true)
                    .render_annotations(true),
            )
            .map_err(|e| ExtractionError::SourceUnavailable(format!("render at {dpi} DPI failed: {e}")))?;

        let width = bitmap.width() as u32;
        let height = bitmap.height() as u32;
        let image = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes()).ok_or_else(|| {
            ExtractionError::SourceUnavailable(format!(
                "bitmap size mismatch for {width}x{height} render at {dpi} DPI"
            ))
        })?;

        Ok(DynamicImage::ImageRgba8(image))
    }

    fn name(&self) -> &str {
        "pdfium"
    }
}
