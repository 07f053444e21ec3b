//! Reconciler / Aggregator
//!
//! Three steps over the vector and OCR candidate lists of one page:
//!
//! 1. Cross-source merge: vector runs are kept as-is; an OCR run within the
//!    length tolerance of any kept entry with a compatible material is a
//!    duplicate and only lends its material when that entry had none.
//! 2. Diameter resolution: near the LF marker first, then the run's own
//!    diameter token, then anywhere in the line; values above the ceiling are
//!    dropped to unknown.
//! 3. Aggregation by exact (diameter, material), unknown being its own value.
//!
//! Two runs with different known materials are never merged.

use crate::config::ReconcileConfig;
use crate::error::{ExtractionError, ExtractionResult};
use crate::tokens::DIAMETER_PATTERN;
use crate::types::{
    AggregatedPipe, CandidateRun, LineOrigin, PageExtraction, PipeSource, ResultSource,
};
use regex::Regex;

/// A candidate after the cross-source merge
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRun {
    pub run: CandidateRun,
    pub source: PipeSource,
}

pub struct Reconciler<'a> {
    config: &'a ReconcileConfig,
    near_unit_re: Regex,
    diameter_re: Regex,
    digits_re: Regex,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a ReconcileConfig) -> ExtractionResult<Self> {
        let near_unit = format!(
            r#"(?i)LF[^\d]{{0,{}}}(?P<dia>\d{{1,2}})\s*(?:"|”|“|″|'')"#,
            config.near_unit_window
        );
        let compile =
            |pattern: &str| Regex::new(pattern).map_err(|e| ExtractionError::Config(e.to_string()));

        Ok(Self {
            config,
            near_unit_re: compile(&near_unit)?,
            diameter_re: compile(DIAMETER_PATTERN)?,
            digits_re: compile(r"\d{1,2}")?,
        })
    }

    /// Full reconciliation of one page
    pub fn reconcile(&self, vector: &[CandidateRun], ocr: &[CandidateRun]) -> PageExtraction {
        let vector: Vec<CandidateRun> = vector.iter().filter(|r| r.is_well_formed()).cloned().collect();
        let ocr: Vec<CandidateRun> = ocr.iter().filter(|r| r.is_well_formed()).cloned().collect();

        let merged = self.merge(&vector, &ocr);
        let pipes = self.aggregate(&merged);
        tracing::info!(
            "🔗 Reconciled {} vector + {} OCR runs into {} entries, {} pipe groups",
            vector.len(),
            ocr.len(),
            merged.len(),
            pipes.len()
        );

        page_result(pipes, &vector, &ocr)
    }

    /// Step 1. Every OCR candidate is checked against all entries kept so far,
    /// vector runs and previously appended OCR runs alike. The kept entry's
    /// length wins; its material is only filled in when unknown.
    pub fn merge(&self, vector: &[CandidateRun], ocr: &[CandidateRun]) -> Vec<MergedRun> {
        let mut merged: Vec<MergedRun> = vector
            .iter()
            .map(|run| MergedRun {
                run: run.clone(),
                source: PipeSource::Vector,
            })
            .collect();

        for candidate in ocr {
            let Some(length) = candidate.length_ft else {
                continue;
            };

            let duplicate = merged.iter().position(|entry| {
                entry.run.length_ft.is_some_and(|l| {
                    (l - length).abs() < self.config.cross_source_length_tolerance
                }) && materials_compatible(entry.run.material.as_deref(), candidate.material.as_deref())
            });

            match duplicate {
                Some(i) => {
                    let entry = &mut merged[i];
                    if entry.run.material.is_none() && candidate.material.is_some() {
                        tracing::debug!(
                            "merge: '{}' takes material {:?} from OCR '{}'",
                            entry.run.raw_text,
                            candidate.material,
                            candidate.raw_text
                        );
                        entry.run.material = candidate.material.clone();
                    }
                    // OCR absorbing OCR stays an OCR entry
                    if entry.source == PipeSource::Vector {
                        entry.source = PipeSource::Merged;
                    }
                }
                None => merged.push(MergedRun {
                    run: candidate.clone(),
                    source: PipeSource::from(LineOrigin::Ocr),
                }),
            }
        }

        merged
    }

    /// Step 2
    pub fn resolve_diameter(&self, run: &CandidateRun) -> Option<f64> {
        let near_unit = self
            .near_unit_re
            .captures(&run.raw_text)
            .and_then(|caps| caps.name("dia"))
            .and_then(|m| m.as_str().parse::<f64>().ok());

        let from_token = || match run.diameter_text.as_deref() {
            Some(text) => self
                .digits_re
                .find(text)
                .and_then(|m| m.as_str().parse::<f64>().ok()),
            None => run.diameter_in,
        };

        let anywhere = || {
            self.diameter_re
                .captures(&run.raw_text)
                .and_then(|caps| caps.name("dia"))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        };

        let diameter = near_unit.or_else(from_token).or_else(anywhere)?;
        if diameter > self.config.diameter_ceiling_in {
            tracing::debug!(
                "Skipping unrealistic diameter {:.1} from raw '{}'",
                diameter,
                run.raw_text
            );
            return None;
        }
        Some(diameter)
    }

    /// Step 3. Groups keep the order in which their first member appeared.
    pub fn aggregate(&self, merged: &[MergedRun]) -> Vec<AggregatedPipe> {
        let mut groups: Vec<AggregatedPipe> = Vec::new();

        for entry in merged {
            let Some(length) = entry.run.length_ft else {
                continue;
            };
            let diameter = self.resolve_diameter(&entry.run);
            let material = entry.run.material.clone();

            match groups
                .iter_mut()
                .find(|g| g.diameter_in == diameter && g.material == material)
            {
                Some(group) => {
                    group.total_length_ft += length;
                    group.count += 1;
                    if group.source != entry.source {
                        group.source = PipeSource::Merged;
                    }
                }
                None => groups.push(AggregatedPipe {
                    diameter_in: diameter,
                    material,
                    total_length_ft: length,
                    count: 1,
                    source: entry.source,
                }),
            }
        }

        groups
    }
}

/// Page record from aggregated pipes and the well-formed runs of each source
pub fn page_result(
    pipes: Vec<AggregatedPipe>,
    vector: &[CandidateRun],
    ocr: &[CandidateRun],
) -> PageExtraction {
    let source = ResultSource::from_contributions(!vector.is_empty(), !ocr.is_empty());
    if source == ResultSource::None {
        tracing::warn!("⚠️  No runs found from either vector or OCR extraction");
    }
    PageExtraction {
        pipes,
        vector_runs: vector.iter().map(CandidateRun::summary).collect(),
        ocr_runs: ocr.iter().map(CandidateRun::summary).collect(),
        source,
    }
}

pub(crate) fn materials_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        raw: &str,
        length: f64,
        diameter: Option<f64>,
        material: Option<&str>,
        origin: LineOrigin,
    ) -> CandidateRun {
        CandidateRun {
            raw_text: raw.to_string(),
            length_text: Some(format!("{length} LF")),
            length_ft: Some(length),
            diameter_text: diameter.map(|d| format!("{d}\"")),
            diameter_in: diameter,
            material: material.map(str::to_string),
            slope_text: None,
            origin,
            dpi: None,
            source_bbox: None,
        }
    }

    fn reconciler(config: &ReconcileConfig) -> Reconciler<'_> {
        Reconciler::new(config).unwrap()
    }

    #[test]
    fn test_merge_promotes_ocr_material() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let vector = vec![run("150 LF 8\"", 150.0, Some(8.0), None, LineOrigin::Vector)];
        let ocr = vec![run("150.5 LF PVC", 150.5, None, Some("PVC"), LineOrigin::Ocr)];

        let merged = r.merge(&vector, &ocr);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].run.length_ft, Some(150.0));
        assert_eq!(merged[0].run.material.as_deref(), Some("PVC"));
        assert_eq!(merged[0].source, PipeSource::Merged);
    }

    #[test]
    fn test_merge_never_joins_different_materials() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let vector = vec![run("150 LF 8\" DIP", 150.0, Some(8.0), Some("DIP"), LineOrigin::Vector)];
        let ocr = vec![run("150 LF 8\" PVC", 150.0, Some(8.0), Some("PVC"), LineOrigin::Ocr)];

        let merged = r.merge(&vector, &ocr);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].source, PipeSource::Ocr);
    }

    #[test]
    fn test_merge_tolerance_is_strict() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let vector = vec![run("100 LF 8\" PVC", 100.0, Some(8.0), Some("PVC"), LineOrigin::Vector)];
        let ocr = vec![run("102 LF 8\" PVC", 102.0, Some(8.0), Some("PVC"), LineOrigin::Ocr)];
        assert_eq!(r.merge(&vector, &ocr).len(), 2);
    }

    #[test]
    fn test_merge_vector_absorbs_every_ocr_duplicate() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let vector = vec![run("40 LF 8\" PVC", 40.0, Some(8.0), Some("PVC"), LineOrigin::Vector)];
        let ocr = vec![
            run("40 LF 8\" PVC", 40.0, Some(8.0), Some("PVC"), LineOrigin::Ocr),
            run("41.5 LF 8\" PVC", 41.5, Some(8.0), Some("PVC"), LineOrigin::Ocr),
        ];
        let merged = r.merge(&vector, &ocr);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].run.length_ft, Some(40.0));
        assert_eq!(merged[0].source, PipeSource::Merged);
    }

    #[test]
    fn test_merge_ocr_entries_absorb_later_ocr_duplicates() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let vector = vec![run("500 LF 12\" DIP", 500.0, Some(12.0), Some("DIP"), LineOrigin::Vector)];
        let ocr = vec![
            run("100 LF 8\" PVC", 100.0, Some(8.0), Some("PVC"), LineOrigin::Ocr),
            run("101.5 LF 8\" PVC", 101.5, Some(8.0), Some("PVC"), LineOrigin::Ocr),
        ];
        let merged = r.merge(&vector, &ocr);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].run.length_ft, Some(100.0));
        assert_eq!(merged[1].source, PipeSource::Ocr);

        let pipes = r.aggregate(&merged);
        let total: f64 = pipes.iter().map(|p| p.total_length_ft).sum();
        assert_eq!(total, 600.0);
    }

    #[test]
    fn test_merge_ocr_conflicting_materials_stay_apart() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let ocr = vec![
            run("100 LF 8\" PVC", 100.0, Some(8.0), Some("PVC"), LineOrigin::Ocr),
            run("100.5 LF 8\" RCP", 100.5, Some(8.0), Some("RCP"), LineOrigin::Ocr),
        ];
        assert_eq!(r.merge(&[], &ocr).len(), 2);
    }

    #[test]
    fn test_resolve_diameter_prefers_near_unit() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let mut candidate = run("12\" MH-3 117 LF 8\" PVC", 117.0, Some(12.0), Some("PVC"), LineOrigin::Vector);
        candidate.diameter_text = Some("12\"".into());
        assert_eq!(r.resolve_diameter(&candidate), Some(8.0));
    }

    #[test]
    fn test_resolve_diameter_falls_back() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);

        let token_only = run("117 LF PVC", 117.0, Some(10.0), Some("PVC"), LineOrigin::Vector);
        assert_eq!(r.resolve_diameter(&token_only), Some(10.0));

        let mut raw_only = run("8\" PVC 117 LF", 117.0, None, Some("PVC"), LineOrigin::Vector);
        raw_only.diameter_text = None;
        assert_eq!(r.resolve_diameter(&raw_only), Some(8.0));

        let none = run("117 LF PVC", 117.0, None, Some("PVC"), LineOrigin::Vector);
        assert_eq!(r.resolve_diameter(&none), None);
    }

    #[test]
    fn test_resolve_diameter_ceiling() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let artifact = run("40 LF 88\" PVC", 40.0, Some(88.0), Some("PVC"), LineOrigin::Ocr);
        assert_eq!(r.resolve_diameter(&artifact), None);

        let edge = run("40 LF 60\" RCP", 40.0, Some(60.0), Some("RCP"), LineOrigin::Ocr);
        assert_eq!(r.resolve_diameter(&edge), Some(60.0));
    }

    #[test]
    fn test_aggregate_groups_and_sums() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let vector = vec![
            run("100 LF 8\" PVC", 100.0, Some(8.0), Some("PVC"), LineOrigin::Vector),
            run("50 LF 8\" PVC", 50.0, Some(8.0), Some("PVC"), LineOrigin::Vector),
            run("30 LF 8\"", 30.0, Some(8.0), None, LineOrigin::Vector),
        ];
        let merged = r.merge(&vector, &[]);
        let pipes = r.aggregate(&merged);

        assert_eq!(pipes.len(), 2);
        assert_eq!(pipes[0].diameter_in, Some(8.0));
        assert_eq!(pipes[0].material.as_deref(), Some("PVC"));
        assert_eq!(pipes[0].total_length_ft, 150.0);
        assert_eq!(pipes[0].count, 2);
        assert_eq!(pipes[1].material, None);
        assert_eq!(pipes[1].total_length_ft, 30.0);
    }

    #[test]
    fn test_aggregate_mixed_sources_are_merged() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let vector = vec![run("100 LF 8\" PVC", 100.0, Some(8.0), Some("PVC"), LineOrigin::Vector)];
        let ocr = vec![run("60 LF 8\" PVC", 60.0, Some(8.0), Some("PVC"), LineOrigin::Ocr)];
        let pipes = r.aggregate(&r.merge(&vector, &ocr));
        assert_eq!(pipes.len(), 1);
        assert_eq!(pipes[0].source, PipeSource::Merged);
        assert_eq!(pipes[0].count, 2);
    }

    #[test]
    fn test_reconcile_source_tags() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let v = vec![run("100 LF 8\" PVC", 100.0, Some(8.0), Some("PVC"), LineOrigin::Vector)];
        let o = vec![run("60 LF 8\" PVC", 60.0, Some(8.0), Some("PVC"), LineOrigin::Ocr)];

        assert_eq!(r.reconcile(&v, &[]).source, ResultSource::Vector);
        assert_eq!(r.reconcile(&[], &o).source, ResultSource::Ocr);
        assert_eq!(r.reconcile(&v, &o).source, ResultSource::Merged);

        let empty = r.reconcile(&[], &[]);
        assert_eq!(empty.source, ResultSource::None);
        assert!(empty.pipes.is_empty());
    }

    #[test]
    fn test_reconcile_drops_malformed() {
        let config = ReconcileConfig::default();
        let r = reconciler(&config);
        let malformed = run("40 LF", 40.0, None, None, LineOrigin::Vector);
        let result = r.reconcile(&[malformed], &[]);
        assert_eq!(result.source, ResultSource::None);
        assert!(result.vector_runs.is_empty());
    }
}
