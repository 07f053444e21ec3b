use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_min_runs_before_ocr() -> usize {
    2
}

fn default_line_grouping_tolerance() -> f32 {
    0.5
}

fn default_max_horizontal_gap_factor() -> f32 {
    2.0
}

fn default_dpis() -> Vec<u32> {
    vec![450, 350, 300]
}

/// Fallback resolutions appended after a caller-chosen primary DPI
pub const FALLBACK_DPIS: [u32; 2] = [350, 300];

fn default_tesseract_path() -> String {
    "tesseract".to_string()
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_engine_mode() -> u8 {
    3
}

fn default_page_segmentation_mode() -> u8 {
    6
}

fn default_recovery_min_candidates() -> usize {
    3
}

fn default_recovery_min_raw_lines() -> usize {
    5
}

fn default_recovery_min_score() -> f64 {
    1.5
}

fn default_recovery_length_tolerance() -> f64 {
    5.0
}

fn default_recovery_templates() -> Vec<String> {
    vec![
        // dominant material: gravity sanitary main
        "100 lf 8\" pvc sdr sanitary sewer".to_string(),
        // secondary material: ductile iron crossings
        "100 lf 8\" dip ductile iron pipe".to_string(),
    ]
}

fn default_cross_dpi_tolerance() -> f64 {
    1.0
}

fn default_cross_source_tolerance() -> f64 {
    2.0
}

fn default_diameter_ceiling() -> f64 {
    60.0
}

fn default_near_unit_window() -> usize {
    6
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    /// Lexical-similarity recovery of missed OCR callouts
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Material vocabulary handed to the token recognizer
    #[serde(default)]
    pub materials: MaterialVocabulary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Well-formed vector runs needed before OCR is skipped
    #[serde(default = "default_min_runs_before_ocr")]
    pub min_runs_before_ocr: usize,
    /// Max vertical center offset, as a fraction of segment height, for two
    /// text segments to sit on the same line
    #[serde(default = "default_line_grouping_tolerance")]
    pub line_grouping_tolerance: f32,
    /// Max horizontal gap between segments of one block, in segment heights
    #[serde(default = "default_max_horizontal_gap_factor")]
    pub max_horizontal_gap_factor: f32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            min_runs_before_ocr: default_min_runs_before_ocr(),
            line_grouping_tolerance: default_line_grouping_tolerance(),
            max_horizontal_gap_factor: default_max_horizontal_gap_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Whether OCR fallback runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Render resolutions, tried in order
    #[serde(default = "default_dpis")]
    pub dpis: Vec<u32>,
    /// Path to the tesseract binary (default relies on PATH)
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Tesseract --oem
    #[serde(default = "default_engine_mode")]
    pub engine_mode: u8,
    /// Tesseract --psm (6 = single uniform block, keeps line grouping)
    #[serde(default = "default_page_segmentation_mode")]
    pub page_segmentation_mode: u8,
    #[serde(default = "default_true")]
    pub preserve_interword_spaces: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dpis: default_dpis(),
            tesseract_path: default_tesseract_path(),
            language: default_language(),
            engine_mode: default_engine_mode(),
            page_segmentation_mode: default_page_segmentation_mode(),
            preserve_interword_spaces: true,
        }
    }
}

impl OcrConfig {
    /// Caller-chosen DPIs first (primary leading), then the usual fallbacks
    /// not already listed
    pub fn set_preferred_dpis(&mut self, preferred: &[u32]) {
        let mut dpis: Vec<u32> = Vec::new();
        for &dpi in preferred.iter().chain(FALLBACK_DPIS.iter()) {
            if !dpis.contains(&dpi) {
                dpis.push(dpi);
            }
        }
        self.dpis = dpis;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Recovery runs when a DPI pass yields fewer candidates than this
    #[serde(default = "default_recovery_min_candidates")]
    pub min_candidates: usize,
    /// ...and the page produced at least this many OCR lines
    #[serde(default = "default_recovery_min_raw_lines")]
    pub min_raw_lines: usize,
    /// BM25 score a top-ranked line must reach
    #[serde(default = "default_recovery_min_score")]
    pub min_score: f64,
    /// A recovered run is dropped when a collected run is this close in length
    #[serde(default = "default_recovery_length_tolerance")]
    pub length_tolerance: f64,
    /// Query phrases describing the shape of a plausible missed callout.
    /// Tuned per drafting firm; override in the YAML config.
    #[serde(default = "default_recovery_templates")]
    pub templates: Vec<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_candidates: default_recovery_min_candidates(),
            min_raw_lines: default_recovery_min_raw_lines(),
            min_score: default_recovery_min_score(),
            length_tolerance: default_recovery_length_tolerance(),
            templates: default_recovery_templates(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Same callout seen at two DPIs when lengths differ by less than this
    #[serde(default = "default_cross_dpi_tolerance")]
    pub cross_dpi_length_tolerance: f64,
    /// Same callout seen by vector and OCR when lengths differ by less than this
    #[serde(default = "default_cross_source_tolerance")]
    pub cross_source_length_tolerance: f64,
    /// Diameters above this are OCR artifacts
    #[serde(default = "default_diameter_ceiling")]
    pub diameter_ceiling_in: f64,
    /// Non-digit characters allowed between LF and the diameter
    #[serde(default = "default_near_unit_window")]
    pub near_unit_window: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            cross_dpi_length_tolerance: default_cross_dpi_tolerance(),
            cross_source_length_tolerance: default_cross_source_tolerance(),
            diameter_ceiling_in: default_diameter_ceiling(),
            near_unit_window: default_near_unit_window(),
        }
    }
}

/// Fixed material vocabulary. Matching and normalization live in
/// `tokens::materials`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialVocabulary {
    pub materials: Vec<MaterialEntry>,
    /// Secondary cues for lines where no alias matched
    #[serde(default)]
    pub cues: Vec<MaterialCue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialEntry {
    pub canonical: String,
    /// Spellings and OCR slips that map to `canonical`
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Material implied when every word in `all_of` appears somewhere in a line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialCue {
    pub material: String,
    pub all_of: Vec<String>,
}

impl Default for MaterialVocabulary {
    fn default() -> Self {
        fn entry(canonical: &str, aliases: &[&str]) -> MaterialEntry {
            MaterialEntry {
                canonical: canonical.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            }
        }
        fn cue(material: &str, all_of: &[&str]) -> MaterialCue {
            MaterialCue {
                material: material.to_string(),
                all_of: all_of.iter().map(|w| w.to_string()).collect(),
            }
        }

        Self {
            materials: vec![
                entry("PVC", &["PNY"]), // PNY: OCR slip
                entry(
                    "DIP",
                    &[
                        "D.I.P.",
                        "DUCTILE IRON PIPE",
                        "DUCTILE IRON",
                        "D1P",
                        "SIP", // OCR slip
                    ],
                ),
                entry("RCP", &[]),
                entry("HDPE", &[]),
            ],
            cues: vec![
                cue("DIP", &["DUCTILE", "IRON"]),
                cue("DIP", &["SIP"]),
                cue("DIP", &["D.I.P"]),
            ],
        }
    }
}

impl ExtractionConfig {
    /// Load config from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ExtractionConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config with fallback to default
    pub fn load_with_fallback(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_else(|e| {
                tracing::warn!("⚠️  Failed to load config from {}: {}, using defaults", p, e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ocr.enabled && self.ocr.dpis.is_empty() {
            bail!("ocr.dpis must list at least one resolution when OCR is enabled");
        }
        if let Some(dpi) = self.ocr.dpis.iter().find(|d| **d == 0) {
            bail!("ocr.dpis contains an invalid resolution: {dpi}");
        }
        let tolerances = [
            ("reconcile.cross_dpi_length_tolerance", self.reconcile.cross_dpi_length_tolerance),
            ("reconcile.cross_source_length_tolerance", self.reconcile.cross_source_length_tolerance),
            ("recovery.length_tolerance", self.recovery.length_tolerance),
        ];
        for (name, value) in tolerances {
            if !(value >= 0.0) {
                bail!("{name} must be a non-negative number, got {value}");
            }
        }
        if !(self.reconcile.diameter_ceiling_in > 0.0) {
            bail!("reconcile.diameter_ceiling_in must be positive");
        }
        if self.materials.materials.is_empty() {
            bail!("materials.materials must define at least one material");
        }
        if let Some(entry) = self
            .materials
            .materials
            .iter()
            .find(|m| m.canonical.trim().is_empty())
        {
            bail!("material entry with empty canonical name (aliases: {:?})", entry.aliases);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExtractionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ocr.dpis, vec![450, 350, 300]);
        assert_eq!(config.vector.min_runs_before_ocr, 2);
        assert_eq!(config.reconcile.diameter_ceiling_in, 60.0);
    }

    #[test]
    fn test_primary_dpi_keeps_fallbacks() {
        let mut ocr = OcrConfig::default();
        ocr.set_preferred_dpis(&[600]);
        assert_eq!(ocr.dpis, vec![600, 350, 300]);

        ocr.set_preferred_dpis(&[350]);
        assert_eq!(ocr.dpis, vec![350, 300]);

        ocr.set_preferred_dpis(&[400, 300, 400]);
        assert_eq!(ocr.dpis, vec![400, 300, 350]);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
ocr:
  dpis: [400]
recovery:
  templates: ["lf 12 rcp storm"]
"#;
        let config: ExtractionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ocr.dpis, vec![400]);
        assert_eq!(config.ocr.tesseract_path, "tesseract");
        assert_eq!(config.recovery.templates, vec!["lf 12 rcp storm".to_string()]);
        assert_eq!(config.recovery.min_candidates, 3);
        assert_eq!(config.materials, MaterialVocabulary::default());
    }

    #[test]
    fn test_validate_rejects_zero_dpi() {
        let mut config = ExtractionConfig::default();
        config.ocr.dpis = vec![450, 0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_tolerance() {
        let mut config = ExtractionConfig::default();
        config.reconcile.cross_source_length_tolerance = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_with_fallback_on_missing_file() {
        let config = ExtractionConfig::load_with_fallback(Some("/nonexistent/takeoff.yaml"));
        assert_eq!(config.ocr.dpis, vec![450, 350, 300]);
    }
}
