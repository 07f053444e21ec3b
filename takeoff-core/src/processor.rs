use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, ExtractionResult};
use crate::extractors::{OcrEngine, OcrExtractor, PageRasterizer, TextLayerSource, VectorExtractor};
use crate::reconcile::{page_result, Reconciler};
use crate::tokens::TokenRecognizer;
use crate::types::*;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timed steps of one page extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Vector,
    Ocr,
    Merge,
    Aggregate,
}

impl PipelineStep {
    pub fn label(self) -> &'static str {
        match self {
            PipelineStep::Vector => "Vector extraction",
            PipelineStep::Ocr => "OCR extraction",
            PipelineStep::Merge => "Merge",
            PipelineStep::Aggregate => "Aggregate",
        }
    }
}

/// Per-page step timings, recorded only when enabled
pub struct StepProfiler {
    enabled: bool,
    timings: Vec<(PipelineStep, Duration)>,
}

impl StepProfiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timings: Vec::new(),
        }
    }

    pub fn time_step<F, R>(&mut self, step: PipelineStep, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if !self.enabled {
            return f();
        }

        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();

        tracing::debug!("⏱️  {}: {:.0}ms", step.label(), elapsed.as_millis());
        self.timings.push((step, elapsed));
        result
    }

    pub fn timings(&self) -> &[(PipelineStep, Duration)] {
        &self.timings
    }

    pub fn ran(&self, step: PipelineStep) -> bool {
        self.timings.iter().any(|(s, _)| *s == step)
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|(_, d)| *d).sum()
    }

    /// One summary line for the page
    pub fn log_summary(&self, page: u32) {
        if !self.enabled || self.timings.is_empty() {
            return;
        }

        let total = self.total();
        let steps: Vec<String> = self
            .timings
            .iter()
            .map(|(step, d)| format!("{} {}ms", step.label(), d.as_millis()))
            .collect();
        tracing::info!(
            "📊 Page {} took {}ms: {}",
            page,
            total.as_millis(),
            steps.join(", ")
        );
    }
}

/// Page-level pipeline state. There is no retry: every stage yields data or
/// an empty set, and a page always ends in `Aggregated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStage {
    NotStarted,
    VectorAttempted,
    OcrAttempted,
    Merged,
    Aggregated,
}

impl PageStage {
    pub fn can_advance_to(self, next: PageStage) -> bool {
        use PageStage::*;
        matches!(
            (self, next),
            (NotStarted, VectorAttempted)
                | (VectorAttempted, OcrAttempted)
                | (VectorAttempted, Merged)
                | (OcrAttempted, Merged)
                | (Merged, Aggregated)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PageStage::Aggregated
    }
}

/// Stage history of one page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTrace {
    page: u32,
    stages: Vec<PageStage>,
}

impl StageTrace {
    fn new(page: u32) -> Self {
        Self {
            page,
            stages: vec![PageStage::NotStarted],
        }
    }

    pub fn current(&self) -> PageStage {
        self.stages.last().copied().unwrap_or(PageStage::NotStarted)
    }

    pub fn stages(&self) -> &[PageStage] {
        &self.stages
    }

    fn advance(&mut self, next: PageStage) {
        let current = self.current();
        debug_assert!(
            current.can_advance_to(next),
            "invalid page stage transition {current:?} -> {next:?}"
        );
        if !current.can_advance_to(next) {
            tracing::error!("❌ Page {}: invalid stage transition {:?} -> {:?}", self.page, current, next);
        }
        tracing::debug!("page {}: {:?} -> {:?}", self.page, current, next);
        self.stages.push(next);
    }
}

/// Page extraction together with the stages it went through
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedExtraction {
    pub extraction: PageExtraction,
    pub trace: StageTrace,
}

/// Outcome of one page in a multi-page run
#[derive(Debug)]
pub struct PageOutcome {
    pub page: u32,
    pub result: ExtractionResult<PageExtraction>,
}

pub struct TakeoffProcessor {
    config: ExtractionConfig,
    recognizer: TokenRecognizer,
    text_layer: Arc<dyn TextLayerSource>,
    rasterizer: Arc<dyn PageRasterizer>,
    ocr_engine: Arc<dyn OcrEngine>,
}

impl TakeoffProcessor {
    /// Create TakeoffProcessor with full dependency injection
    pub fn new_with_dependencies(
        config: ExtractionConfig,
        text_layer: Arc<dyn TextLayerSource>,
        rasterizer: Arc<dyn PageRasterizer>,
        ocr_engine: Arc<dyn OcrEngine>,
    ) -> ExtractionResult<Self> {
        config
            .validate()
            .map_err(|e| ExtractionError::Config(e.to_string()))?;
        let recognizer = TokenRecognizer::new(&config.materials)?;

        Ok(Self {
            config,
            recognizer,
            text_layer,
            rasterizer,
            ocr_engine,
        })
    }

    /// Convenience constructor: pdfium for text layer and rendering,
    /// tesseract CLI for OCR
    #[cfg(feature = "pdfium-backend")]
    pub fn new_default(config: ExtractionConfig) -> anyhow::Result<Self> {
        use crate::extractors::{PdfiumBackend, TesseractCli};

        let pdfium = Arc::new(PdfiumBackend::new()?);
        let tesseract = Arc::new(TesseractCli::from_config(&config.ocr));
        if config.ocr.enabled && !tesseract.is_healthy() {
            tracing::warn!(
                "⚠️  tesseract not runnable at '{}'; OCR passes will fail and be skipped",
                config.ocr.tesseract_path
            );
        }
        Ok(Self::new_with_dependencies(
            config,
            pdfium.clone(),
            pdfium,
            tesseract,
        )?)
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn extract_page(&self, pdf: &Path, page: u32) -> ExtractionResult<PageExtraction> {
        self.extract_page_with_profiling(pdf, page, false)
    }

    pub fn extract_page_with_profiling(
        &self,
        pdf: &Path,
        page: u32,
        enable_profiling: bool,
    ) -> ExtractionResult<PageExtraction> {
        let mut profiler = StepProfiler::new(enable_profiling);
        let staged = self.extract_page_staged(pdf, page, &mut profiler)?;
        profiler.log_summary(page);
        Ok(staged.extraction)
    }

    /// Vector first; OCR only when vector found too few well-formed runs;
    /// then merge and aggregate. Only a document that cannot be opened or a
    /// bad page number is an error.
    pub fn extract_page_staged(
        &self,
        pdf: &Path,
        page: u32,
        profiler: &mut StepProfiler,
    ) -> ExtractionResult<StagedExtraction> {
        if page == 0 {
            return Err(ExtractionError::InvalidPageNumber(page));
        }
        tracing::info!("📐 Extracting pipe runs from {} page {}", pdf.display(), page);
        let mut trace = StageTrace::new(page);

        // Step 1: vector text layer
        let vector = profiler.time_step(PipelineStep::Vector, || {
            VectorExtractor::new(&self.recognizer, &self.config.vector).extract(
                self.text_layer.as_ref(),
                pdf,
                page,
            )
        })?;
        trace.advance(PageStage::VectorAttempted);

        // Step 2: OCR fallback
        let min_runs = self.config.vector.min_runs_before_ocr;
        let ocr = if vector.len() >= min_runs {
            tracing::info!(
                "✅ Vector runs sufficient ({} >= {}); skipping OCR fallback",
                vector.len(),
                min_runs
            );
            Vec::new()
        } else if !self.config.ocr.enabled {
            tracing::info!("⏭️  Vector found {} runs but OCR is disabled", vector.len());
            Vec::new()
        } else {
            tracing::info!(
                "🔍 Vector found {} < {} runs, trying OCR (DPIs: {:?})",
                vector.len(),
                min_runs,
                self.config.ocr.dpis
            );
            let ocr = profiler.time_step(PipelineStep::Ocr, || {
                OcrExtractor::new(
                    &self.recognizer,
                    &self.config.ocr,
                    &self.config.recovery,
                    self.config.reconcile.cross_dpi_length_tolerance,
                )
                .extract(self.rasterizer.as_ref(), self.ocr_engine.as_ref(), pdf, page)
            })?;
            trace.advance(PageStage::OcrAttempted);
            ocr
        };

        // Step 3: merge + aggregate
        let reconciler = Reconciler::new(&self.config.reconcile)?;
        let merged = profiler.time_step(PipelineStep::Merge, || reconciler.merge(&vector, &ocr));
        trace.advance(PageStage::Merged);
        let pipes = profiler.time_step(PipelineStep::Aggregate, || reconciler.aggregate(&merged));
        trace.advance(PageStage::Aggregated);

        let extraction = page_result(pipes, &vector, &ocr);
        tracing::info!(
            "📦 Page {}: {} pipe groups, {:.1} LF total (source: {:?})",
            page,
            extraction.pipes.len(),
            extraction.total_length_ft(),
            extraction.source
        );

        Ok(StagedExtraction { extraction, trace })
    }

    /// Pages are processed one after another and independently; a failing
    /// page is reported in its outcome and never stops the batch.
    pub fn extract_pages(&self, pdf: &Path, pages: &[u32]) -> Vec<PageOutcome> {
        self.extract_pages_with_profiling(pdf, pages, false)
    }

    pub fn extract_pages_with_profiling(
        &self,
        pdf: &Path,
        pages: &[u32],
        enable_profiling: bool,
    ) -> Vec<PageOutcome> {
        pages
            .iter()
            .map(|&page| {
                let result = self.extract_page_with_profiling(pdf, page, enable_profiling);
                if let Err(e) = &result {
                    tracing::error!("❌ Page {} failed: {}", page, e);
                }
                PageOutcome { page, result }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        use PageStage::*;
        assert!(NotStarted.can_advance_to(VectorAttempted));
        assert!(VectorAttempted.can_advance_to(Merged));
        assert!(VectorAttempted.can_advance_to(OcrAttempted));
        assert!(OcrAttempted.can_advance_to(Merged));
        assert!(Merged.can_advance_to(Aggregated));

        assert!(!NotStarted.can_advance_to(OcrAttempted));
        assert!(!Aggregated.can_advance_to(NotStarted));
        assert!(!Merged.can_advance_to(OcrAttempted));
        assert!(Aggregated.is_terminal());
    }

    #[test]
    fn test_trace_records_path() {
        let mut trace = StageTrace::new(3);
        trace.advance(PageStage::VectorAttempted);
        trace.advance(PageStage::Merged);
        trace.advance(PageStage::Aggregated);
        assert_eq!(trace.current(), PageStage::Aggregated);
        assert_eq!(trace.stages().len(), 4);
    }

    #[test]
    fn test_profiler_disabled_records_nothing() {
        let mut profiler = StepProfiler::new(false);
        let value = profiler.time_step(PipelineStep::Vector, || 42);
        assert_eq!(value, 42);
        assert!(profiler.timings().is_empty());
        assert!(profiler.total().is_zero());
    }

    #[test]
    fn test_profiler_enabled_records_steps() {
        let mut profiler = StepProfiler::new(true);
        profiler.time_step(PipelineStep::Vector, || ());
        profiler.time_step(PipelineStep::Merge, || ());
        let steps: Vec<PipelineStep> = profiler.timings().iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![PipelineStep::Vector, PipelineStep::Merge]);
        assert!(profiler.ran(PipelineStep::Merge));
        assert!(!profiler.ran(PipelineStep::Ocr));
        assert_eq!(PipelineStep::Ocr.label(), "OCR extraction");
    }
}
