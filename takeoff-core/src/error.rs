//! Extraction error taxonomy.
//!
//! Only `CatastrophicIo` and bad page numbers ever reach the caller of a page
//! extraction. `SourceUnavailable` and `OcrEngine` are raised by backends and
//! recovered by the extractors (empty candidate list, next fallback stage).
//! Ambiguous lines and malformed candidates are not errors at all: they are
//! `Recognition` outcomes and simply lower the run count.

use std::path::PathBuf;
use thiserror::Error;

pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The PDF cannot be opened at all
    #[error("cannot open PDF {path}: {reason}")]
    CatastrophicIo { path: PathBuf, reason: String },

    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("page numbers are 1-indexed, got {0}")]
    InvalidPageNumber(u32),

    /// No text layer, or rasterization failed for one DPI
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("OCR engine failed: {0}")]
    OcrEngine(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExtractionError {
    pub fn catastrophic(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ExtractionError::CatastrophicIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the page-level pipeline must stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractionError::CatastrophicIo { .. }
                | ExtractionError::PageOutOfRange { .. }
                | ExtractionError::InvalidPageNumber(_)
        )
    }
}
