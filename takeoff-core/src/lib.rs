// Takeoff Core Library
//
// Pipe-run extraction from construction drawing PDFs: vector text first,
// multi-DPI OCR with lexical recovery as fallback, then a fuzzy reconciler
// that merges both sources and aggregates runs per (diameter, material).

pub mod types;
pub mod error;
pub mod config;
pub mod tokens;
pub mod repair;
pub mod recovery;
pub mod extractors;
pub mod reconcile;
pub mod processor;
pub mod markdown;

// Re-export main types and functions for easy use
pub use types::*;
pub use error::{ExtractionError, ExtractionResult};
pub use config::ExtractionConfig;
pub use extractors::{OcrEngine, OcrWord, PageRasterizer, TesseractCli, TextLayerSource, TextSegment};
pub use processor::{PageOutcome, PageStage, PipelineStep, StagedExtraction, StepProfiler, TakeoffProcessor};
pub use reconcile::Reconciler;
pub use markdown::{MarkdownParser, VisionTakeoff};

// Re-export backends for direct use
#[cfg(feature = "pdfium-backend")]
pub use extractors::PdfiumBackend;
