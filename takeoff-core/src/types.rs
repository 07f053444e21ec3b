use serde::{Deserialize, Serialize};

// ===== RAW TEXT =====
// Everything downstream of the extractors works with RawLine and CandidateRun,
// regardless of whether the text came from the PDF text layer or from OCR.

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    /// Smallest box containing both
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOrigin {
    Vector,
    Ocr,
}

/// One line of recognized text. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawLine {
    text: String,
    source_bbox: Option<BoundingBox>,
    origin: LineOrigin,
    dpi: Option<u32>,
}

impl RawLine {
    pub fn vector(text: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            text: text.into(),
            source_bbox: Some(bbox),
            origin: LineOrigin::Vector,
            dpi: None,
        }
    }

    pub fn ocr(text: impl Into<String>, dpi: u32) -> Self {
        Self {
            text: text.into(),
            source_bbox: None,
            origin: LineOrigin::Ocr,
            dpi: Some(dpi),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_bbox(&self) -> Option<BoundingBox> {
        self.source_bbox
    }

    pub fn origin(&self) -> LineOrigin {
        self.origin
    }

    pub fn dpi(&self) -> Option<u32> {
        self.dpi
    }
}

/// A pipe-segment callout recognized on a single line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRun {
    /// Originating line, kept for audit (after whitespace collapse / repair)
    pub raw_text: String,
    pub length_text: Option<String>,
    /// None when the length token could not be parsed confidently
    pub length_ft: Option<f64>,
    pub diameter_text: Option<String>,
    pub diameter_in: Option<f64>,
    /// Canonical material, or an unmapped uppercase token
    pub material: Option<String>,
    /// Informational only
    pub slope_text: Option<String>,
    pub origin: LineOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_bbox: Option<BoundingBox>,
}

impl CandidateRun {
    /// A run needs a length and at least one of diameter / material
    pub fn is_well_formed(&self) -> bool {
        self.length_ft.is_some() && (self.diameter_in.is_some() || self.material.is_some())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            length_ft: self.length_ft,
            diameter_text: self.diameter_text.clone(),
            material: self.material.clone(),
            raw: self.raw_text.clone(),
        }
    }
}

// ===== OUTPUT =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeSource {
    Vector,
    Ocr,
    Merged,
}

impl From<LineOrigin> for PipeSource {
    fn from(origin: LineOrigin) -> Self {
        match origin {
            LineOrigin::Vector => PipeSource::Vector,
            LineOrigin::Ocr => PipeSource::Ocr,
        }
    }
}

/// Which extractors contributed to a page result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Vector,
    Ocr,
    Merged,
    None,
}

impl ResultSource {
    pub fn from_contributions(vector: bool, ocr: bool) -> Self {
        match (vector, ocr) {
            (true, true) => ResultSource::Merged,
            (true, false) => ResultSource::Vector,
            (false, true) => ResultSource::Ocr,
            (false, false) => ResultSource::None,
        }
    }
}

/// Pipes sharing one (diameter, material) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPipe {
    pub diameter_in: Option<f64>,
    pub material: Option<String>,
    #[serde(rename = "length_ft")]
    pub total_length_ft: f64,
    pub count: usize,
    pub source: PipeSource,
}

/// Audit view of a candidate run in the page result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub length_ft: Option<f64>,
    pub diameter_text: Option<String>,
    pub material: Option<String>,
    pub raw: String,
}

/// Result of one page extraction. JSON-serializable by construction;
/// the caller owns persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageExtraction {
    pub pipes: Vec<AggregatedPipe>,
    pub vector_runs: Vec<RunSummary>,
    pub ocr_runs: Vec<RunSummary>,
    pub source: ResultSource,
}

impl PageExtraction {
    pub fn empty() -> Self {
        Self {
            pipes: Vec::new(),
            vector_runs: Vec::new(),
            ocr_runs: Vec::new(),
            source: ResultSource::None,
        }
    }

    pub fn total_length_ft(&self) -> f64 {
        self.pipes.iter().map(|p| p.total_length_ft).sum()
    }
}
