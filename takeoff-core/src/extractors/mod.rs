//! Candidate-run extractors
//!
//! ## Architecture
//!
//! ```text
//! PDF page
//!     ├── TextLayerSource → assemble_blocks → TokenRecognizer      (VectorExtractor)
//!     └── PageRasterizer @ DPI → OcrEngine → reconstruct_lines
//!             → RepairPipeline → TokenRecognizer → LexicalRecovery   (OcrExtractor)
//!     ↓
//! Vec<CandidateRun> (well-formed only)
//! ```

pub mod backends;
pub mod ocr;
pub mod vector;

pub use backends::{OcrEngine, OcrWord, PageRasterizer, TesseractCli, TextLayerSource, TextSegment};
pub use ocr::{dedup_across_passes, reconstruct_lines, OcrExtractor, OcrPass};
pub use vector::{assemble_blocks, TextBlock, VectorExtractor};

#[cfg(feature = "pdfium-backend")]
pub use backends::PdfiumBackend;
