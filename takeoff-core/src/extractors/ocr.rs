use super::backends::{OcrEngine, OcrWord, PageRasterizer};
use crate::config::{OcrConfig, RecoveryConfig};
use crate::error::ExtractionResult;
use crate::reconcile::materials_compatible;
use crate::recovery::LexicalRecovery;
use crate::repair::RepairPipeline;
use crate::tokens::{collapse_whitespace, CuePolicy, Recognition, TokenRecognizer};
use crate::types::{CandidateRun, RawLine};
use std::collections::HashMap;
use std::path::Path;

/// Lines and runs produced by a single DPI pass
#[derive(Debug, Clone, Default)]
pub struct OcrPass {
    pub dpi: u32,
    pub lines: Vec<String>,
    pub candidates: Vec<CandidateRun>,
    pub recovered: usize,
}

/// Rebuild line text from words sharing the engine's (block, paragraph, line)
/// identity. Lines keep the order in which their first word appeared.
pub fn reconstruct_lines(words: &[OcrWord]) -> Vec<String> {
    let mut order: Vec<(u32, u32, u32)> = Vec::new();
    let mut lines: HashMap<(u32, u32, u32), Vec<&str>> = HashMap::new();

    for word in words {
        let text = word.text.trim();
        if text.is_empty() {
            continue;
        }
        let key = word.line_key();
        lines
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(text);
    }

    order
        .into_iter()
        .filter_map(|key| lines.remove(&key))
        .map(|parts| parts.join(" "))
        .collect()
}

pub struct OcrExtractor<'a> {
    recognizer: &'a TokenRecognizer,
    config: &'a OcrConfig,
    recovery: &'a RecoveryConfig,
    cross_dpi_tolerance: f64,
    repair: RepairPipeline,
    recovery_repair: RepairPipeline,
}

impl<'a> OcrExtractor<'a> {
    pub fn new(
        recognizer: &'a TokenRecognizer,
        config: &'a OcrConfig,
        recovery: &'a RecoveryConfig,
        cross_dpi_tolerance: f64,
    ) -> Self {
        Self {
            recognizer,
            config,
            recovery,
            cross_dpi_tolerance,
            repair: RepairPipeline::ocr_default(),
            recovery_repair: RepairPipeline::recovery(),
        }
    }

    /// Run every configured DPI in order and deduplicate across passes.
    /// A failing DPI is logged and skipped; all failing gives an empty list.
    /// Only fatal errors (document unreadable, page out of range) propagate.
    pub fn extract(
        &self,
        rasterizer: &dyn PageRasterizer,
        engine: &dyn OcrEngine,
        pdf: &Path,
        page: u32,
    ) -> ExtractionResult<Vec<CandidateRun>> {
        let mut passes: Vec<Vec<CandidateRun>> = Vec::new();

        for &dpi in &self.config.dpis {
            let collected: Vec<CandidateRun> = passes.iter().flatten().cloned().collect();
            match self.run_pass(rasterizer, engine, pdf, page, dpi, &collected) {
                Ok(pass) => {
                    if pass.candidates.is_empty() {
                        tracing::info!("🔍 OCR at {} DPI returned no runs ({} lines)", dpi, pass.lines.len());
                    } else {
                        tracing::info!(
                            "🔍 OCR at {} DPI found {} runs ({} recovered) from {} lines",
                            dpi,
                            pass.candidates.len(),
                            pass.recovered,
                            pass.lines.len()
                        );
                    }
                    passes.push(pass.candidates);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("⚠️  OCR extraction failed at {} DPI: {}", dpi, e);
                }
            }
        }

        let total: usize = passes.iter().map(Vec::len).sum();
        let unique = dedup_across_passes(passes, self.cross_dpi_tolerance);
        if total > 0 {
            tracing::info!("🔍 OCR deduped {} runs to {} unique runs", total, unique.len());
        }
        Ok(unique)
    }

    /// One DPI: rasterize, recognize, rebuild lines, scan, then recover if
    /// direct scanning came up short
    pub fn run_pass(
        &self,
        rasterizer: &dyn PageRasterizer,
        engine: &dyn OcrEngine,
        pdf: &Path,
        page: u32,
        dpi: u32,
        collected: &[CandidateRun],
    ) -> ExtractionResult<OcrPass> {
        let image = rasterizer.rasterize(pdf, page, dpi)?;
        let words = engine.recognize(&image, dpi)?;
        drop(image);

        let lines = reconstruct_lines(&words);
        Ok(self.process_lines(lines, dpi, collected))
    }

    /// Direct scan plus recovery over already reconstructed lines
    pub fn process_lines(&self, lines: Vec<String>, dpi: u32, collected: &[CandidateRun]) -> OcrPass {
        let mut candidates: Vec<CandidateRun> = lines
            .iter()
            .filter_map(|line| self.recognize_line(line, dpi, &self.repair))
            .collect();

        let recovery = LexicalRecovery::new(self.recovery);
        let mut recovered = 0;
        if recovery.should_run(candidates.len(), lines.len()) {
            tracing::info!(
                "🔎 Only {} runs at {} DPI, ranking {} lines against recovery templates",
                candidates.len(),
                dpi,
                lines.len()
            );
            let known: Vec<CandidateRun> = collected.iter().chain(candidates.iter()).cloned().collect();
            let extra = recovery.recover(&lines, &known, |line| {
                self.recognize_line(line, dpi, &self.recovery_repair)
            });
            recovered = extra.len();
            candidates.extend(extra);
        }

        OcrPass {
            dpi,
            lines,
            candidates,
            recovered,
        }
    }

    fn recognize_line(&self, line: &str, dpi: u32, repair: &RepairPipeline) -> Option<CandidateRun> {
        let repaired = repair.apply(&collapse_whitespace(line));
        let raw = RawLine::ocr(repaired, dpi);
        match self.recognizer.recognize(&raw, CuePolicy::Gate) {
            Recognition::Candidate(run) if run.is_well_formed() => Some(run),
            Recognition::Candidate(_) | Recognition::Ambiguous => {
                tracing::debug!("ocr: rejected '{}' at {} DPI", raw.text(), dpi);
                None
            }
            Recognition::NoLength => None,
        }
    }
}

/// Collapse candidates that the DPI passes found for the same callout.
///
/// The passes are scanned in order as one list. A candidate is a duplicate of
/// any entry already kept when the lengths differ by less than `tolerance`
/// and the materials are compatible (equal, or either unknown); the first
/// length is kept and the known material wins. This applies within a pass too.
pub fn dedup_across_passes(passes: Vec<Vec<CandidateRun>>, tolerance: f64) -> Vec<CandidateRun> {
    let mut unique: Vec<CandidateRun> = Vec::new();

    for candidate in passes.into_iter().flatten() {
        let Some(length) = candidate.length_ft else {
            continue;
        };
        let duplicate = unique.iter_mut().find(|kept| {
            kept.length_ft
                .is_some_and(|kept_length| (kept_length - length).abs() < tolerance)
                && materials_compatible(kept.material.as_deref(), candidate.material.as_deref())
        });

        match duplicate {
            Some(kept) => {
                if kept.material.is_none() {
                    kept.material = candidate.material;
                }
            }
            None => unique.push(candidate),
        }
    }

    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaterialVocabulary;
    use crate::types::LineOrigin;

    fn word(text: &str, block: u32, line: u32) -> OcrWord {
        OcrWord {
            text: text.to_string(),
            block,
            paragraph: 1,
            line,
            confidence: 90.0,
        }
    }

    fn run(length: f64, material: Option<&str>, dpi: u32) -> CandidateRun {
        CandidateRun {
            raw_text: format!("{length} LF"),
            length_text: Some(format!("{length} LF")),
            length_ft: Some(length),
            diameter_text: None,
            diameter_in: Some(8.0),
            material: material.map(str::to_string),
            slope_text: None,
            origin: LineOrigin::Ocr,
            dpi: Some(dpi),
            source_bbox: None,
        }
    }

    #[test]
    fn test_reconstruct_lines_groups_by_identity() {
        let words = vec![
            word("215LF", 1, 1),
            word("STA", 2, 1),
            word("8\"", 1, 1),
            word("  ", 1, 2),
            word("10+00", 2, 1),
            word("DIP", 1, 1),
        ];
        assert_eq!(reconstruct_lines(&words), vec!["215LF 8\" DIP", "STA 10+00"]);
    }

    #[test]
    fn test_process_lines_repairs_before_recognition() {
        let recognizer = TokenRecognizer::new(&MaterialVocabulary::default()).unwrap();
        let config = OcrConfig::default();
        let recovery = RecoveryConfig::default();
        let extractor = OcrExtractor::new(&recognizer, &config, &recovery, 1.0);

        let pass = extractor.process_lines(vec!["215Lf 8\" DIP".to_string()], 450, &[]);
        assert_eq!(pass.candidates.len(), 1);
        let found = &pass.candidates[0];
        assert_eq!(found.length_ft, Some(215.0));
        assert_eq!(found.diameter_text.as_deref(), Some("8\""));
        assert_eq!(found.material.as_deref(), Some("DIP"));
        assert_eq!(found.dpi, Some(450));
    }

    #[test]
    fn test_process_lines_uses_dip_cue() {
        let recognizer = TokenRecognizer::new(&MaterialVocabulary::default()).unwrap();
        let config = OcrConfig::default();
        let recovery = RecoveryConfig::default();
        let extractor = OcrExtractor::new(&recognizer, &config, &recovery, 1.0);

        let pass = extractor.process_lines(
            vec!["26 LF DUCTILE CL 350 IRON".to_string(), "40 LF".to_string()],
            350,
            &[],
        );
        assert_eq!(pass.candidates.len(), 1);
        assert_eq!(pass.candidates[0].material.as_deref(), Some("DIP"));
    }

    #[test]
    fn test_dedup_across_passes_fills_material() {
        let passes = vec![
            vec![run(150.0, None, 450)],
            vec![run(150.4, Some("PVC"), 350)],
        ];
        let unique = dedup_across_passes(passes, 1.0);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].length_ft, Some(150.0));
        assert_eq!(unique[0].material.as_deref(), Some("PVC"));
    }

    #[test]
    fn test_dedup_keeps_conflicting_materials() {
        let passes = vec![
            vec![run(150.0, Some("DIP"), 450)],
            vec![run(150.2, Some("PVC"), 350)],
        ];
        assert_eq!(dedup_across_passes(passes, 1.0).len(), 2);
    }

    #[test]
    fn test_dedup_collapses_within_a_pass() {
        let passes = vec![
            vec![run(40.0, Some("PVC"), 450), run(40.0, Some("PVC"), 450)],
            vec![run(40.0, Some("PVC"), 350)],
        ];
        let unique = dedup_across_passes(passes, 1.0);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].dpi, Some(450));
    }

    #[test]
    fn test_dedup_absorbs_every_close_candidate() {
        let passes = vec![
            vec![run(40.0, Some("PVC"), 450)],
            vec![run(40.0, Some("PVC"), 350), run(40.3, Some("PVC"), 350)],
        ];
        let unique = dedup_across_passes(passes, 1.0);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].length_ft, Some(40.0));
    }

    #[test]
    fn test_dedup_single_pass() {
        let passes = vec![vec![
            run(40.0, None, 300),
            run(40.6, Some("RCP"), 300),
            run(75.0, Some("RCP"), 300),
        ]];
        let unique = dedup_across_passes(passes, 1.0);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].length_ft, Some(40.0));
        assert_eq!(unique[0].material.as_deref(), Some("RCP"));
        assert_eq!(unique[1].length_ft, Some(75.0));
    }
}
