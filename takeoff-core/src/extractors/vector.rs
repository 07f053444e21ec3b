use super::backends::{TextLayerSource, TextSegment};
use crate::config::VectorConfig;
use crate::error::{ExtractionError, ExtractionResult};
use crate::tokens::{CuePolicy, Recognition, TokenRecognizer};
use crate::types::{BoundingBox, CandidateRun, RawLine};
use std::cmp::Ordering;
use std::path::Path;

/// Text segments merged into one physical line of text
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BoundingBox,
}

pub struct VectorExtractor<'a> {
    recognizer: &'a TokenRecognizer,
    config: &'a VectorConfig,
}

impl<'a> VectorExtractor<'a> {
    pub fn new(recognizer: &'a TokenRecognizer, config: &'a VectorConfig) -> Self {
        Self { recognizer, config }
    }

    /// Well-formed runs from the page text layer. A page without usable text
    /// yields an empty list; only a document that cannot be opened (or a bad
    /// page number) is an error.
    pub fn extract(
        &self,
        source: &dyn TextLayerSource,
        pdf: &Path,
        page: u32,
    ) -> ExtractionResult<Vec<CandidateRun>> {
        let segments = match source.text_segments(pdf, page) {
            Ok(segments) => segments,
            Err(e) if e.is_fatal() => return Err(e),
            Err(ExtractionError::SourceUnavailable(reason)) => {
                tracing::info!("📄 No text layer on page {} ({}), falling through to OCR", page, reason);
                return Ok(Vec::new());
            }
            Err(e) => {
                tracing::warn!("⚠️  {} text layer failed on page {}: {}", source.name(), page, e);
                return Ok(Vec::new());
            }
        };

        let blocks = assemble_blocks(segments, self.config);
        let runs = self.runs_from_blocks(&blocks);
        tracing::info!(
            "📄 Vector extraction: {} runs from {} text blocks on page {}",
            runs.len(),
            blocks.len(),
            page
        );
        Ok(runs)
    }

    pub fn runs_from_blocks(&self, blocks: &[TextBlock]) -> Vec<CandidateRun> {
        blocks
            .iter()
            .map(|block| RawLine::vector(block.text.as_str(), block.bbox))
            .filter_map(|line| match self.recognizer.recognize(&line, CuePolicy::FillOnly) {
                Recognition::Candidate(run) if run.is_well_formed() => Some(run),
                Recognition::Candidate(run) => {
                    tracing::debug!("vector: malformed candidate dropped: '{}'", run.raw_text);
                    None
                }
                Recognition::Ambiguous => {
                    tracing::debug!("vector: ambiguous length rejected: '{}'", line.text());
                    None
                }
                Recognition::NoLength => None,
            })
            .collect()
    }
}

fn by_position(a: &TextSegment, b: &TextSegment) -> Ordering {
    a.bbox
        .center_y()
        .partial_cmp(&b.bbox.center_y())
        .unwrap_or(Ordering::Equal)
        .then(a.bbox.x.partial_cmp(&b.bbox.x).unwrap_or(Ordering::Equal))
}

/// Group segments into lines by vertical center, then split each line into
/// blocks wherever the horizontal gap exceeds `max_horizontal_gap_factor`
/// segment heights. Blocks come out top-to-bottom, left-to-right.
pub fn assemble_blocks(mut segments: Vec<TextSegment>, config: &VectorConfig) -> Vec<TextBlock> {
    segments.retain(|s| !s.text.trim().is_empty());
    segments.sort_by(by_position);

    // Step 1: lines
    let mut lines: Vec<Vec<TextSegment>> = Vec::new();
    for segment in segments {
        let joins_last = lines.last().and_then(|line| line.first()).is_some_and(|first| {
            let height = first.bbox.height.max(segment.bbox.height).max(1.0);
            (first.bbox.center_y() - segment.bbox.center_y()).abs()
                <= config.line_grouping_tolerance * height
        });
        match lines.last_mut() {
            Some(line) if joins_last => line.push(segment),
            _ => lines.push(vec![segment]),
        }
    }

    // Step 2: blocks within a line
    let mut blocks = Vec::new();
    for mut line in lines {
        line.sort_by(|a, b| a.bbox.x.partial_cmp(&b.bbox.x).unwrap_or(Ordering::Equal));

        let mut current: Option<TextBlock> = None;
        for segment in line {
            current = Some(match current.take() {
                Some(mut block) => {
                    let height = block.bbox.height.max(segment.bbox.height).max(1.0);
                    let gap = segment.bbox.x - block.bbox.right();
                    if gap > config.max_horizontal_gap_factor * height {
                        blocks.push(block);
                        TextBlock {
                            text: segment.text.trim().to_string(),
                            bbox: segment.bbox,
                        }
                    } else {
                        block.text.push(' ');
                        block.text.push_str(segment.text.trim());
                        block.bbox = block.bbox.union(&segment.bbox);
                        block
                    }
                }
                None => TextBlock {
                    text: segment.text.trim().to_string(),
                    bbox: segment.bbox,
                },
            });
        }
        blocks.extend(current);
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaterialVocabulary;

    fn seg(text: &str, x: f32, y: f32, width: f32) -> TextSegment {
        TextSegment::new(
            text,
            BoundingBox {
                x,
                y,
                width,
                height: 10.0,
            },
        )
    }

    #[test]
    fn test_assemble_joins_segments_on_one_line() {
        let segments = vec![
            seg("8\" PVC", 160.0, 100.5, 40.0),
            seg("117 LF", 100.0, 100.0, 50.0),
            seg("@ 0.50%", 205.0, 99.5, 35.0),
        ];
        let blocks = assemble_blocks(segments, &VectorConfig::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "117 LF 8\" PVC @ 0.50%");
        assert_eq!(blocks[0].bbox.x, 100.0);
        assert_eq!(blocks[0].bbox.right(), 240.0);
    }

    #[test]
    fn test_assemble_splits_far_segments_and_lines() {
        let segments = vec![
            seg("117 LF 8\" PVC", 100.0, 100.0, 80.0),
            seg("STA 10+00", 600.0, 100.0, 50.0),
            seg("42 LF 8\" DIP", 100.0, 300.0, 80.0),
        ];
        let blocks = assemble_blocks(segments, &VectorConfig::default());
        let texts: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["117 LF 8\" PVC", "STA 10+00", "42 LF 8\" DIP"]);
    }

    #[test]
    fn test_assemble_empty() {
        assert!(assemble_blocks(Vec::new(), &VectorConfig::default()).is_empty());
    }

    #[test]
    fn test_runs_from_blocks_keeps_bbox_and_filters() {
        let recognizer = TokenRecognizer::new(&MaterialVocabulary::default()).unwrap();
        let config = VectorConfig::default();
        let extractor = VectorExtractor::new(&recognizer, &config);
        let blocks = vec![
            TextBlock {
                text: "117 LF 8\" PVC @ 0.50%".into(),
                bbox: BoundingBox {
                    x: 1.0,
                    y: 2.0,
                    width: 3.0,
                    height: 4.0,
                },
            },
            TextBlock {
                text: "40 LF".into(),
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                },
            },
        ];
        let runs = extractor.runs_from_blocks(&blocks);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].source_bbox.map(|b| b.x), Some(1.0));
        assert_eq!(runs[0].slope_text.as_deref(), Some("@ 0.50%"));
    }
}
