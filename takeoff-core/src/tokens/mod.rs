//! Token Recognizer
//!
//! Pattern primitives that find, on one line of text, at most one each of:
//! a length (`117 LF`), a diameter (`8"`), a material (`PVC`, `D.I.P.`, ...)
//! and a slope (`@ 0.50%`). The material vocabulary is injected at
//! construction; nothing here reads global state.
//!
//! A line without a length never becomes a candidate. A line with a length
//! but neither diameter nor material is rejected as ambiguous (station
//! callouts, dimension strings), unless the caller's `CuePolicy` lets a
//! secondary material cue rescue it.

pub mod materials;

use crate::config::MaterialVocabulary;
use crate::error::{ExtractionError, ExtractionResult};
use crate::types::{BoundingBox, CandidateRun, LineOrigin, RawLine};
use regex::Regex;
use std::ops::Range;

/// Number (optionally thousands-grouped) directly followed by the LF marker.
/// The marker may run straight into a digit (`LF8"`) but not into a letter.
const LENGTH_PATTERN: &str =
    r"(?i)(?P<number>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*(?P<unit>LF)(?:[^A-Za-z]|$)";

/// One or two digits, not preceded by another digit, followed by an inch glyph
pub(crate) const DIAMETER_PATTERN: &str =
    r#"(?:^|[^\d.])(?P<dia>\d{1,2})\s*(?P<mark>"|”|“|″|'')"#;

const SLOPE_PATTERN: &str = r"@\s*(?P<slope>\d+(?:\.\d+)?)\s*%";

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// How secondary material cues ("DUCTILE" ... "IRON") are used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuePolicy {
    /// Cue fills a missing material only after a diameter passed the gate
    FillOnly,
    /// Cue counts as a material and can rescue a line from rejection (OCR)
    Gate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPath {
    /// Found by the length regex
    Pattern,
    /// Found by scanning whitespace tokens (dotted or split units: `L.F.`, `L F`)
    TokenScan,
}

/// Length token with the same named parts whichever path produced it
#[derive(Debug, Clone, PartialEq)]
pub struct LengthMatch {
    /// Numeric part as written, e.g. "1,215"
    pub number: String,
    /// Unit marker as written, e.g. "LF" or "L.F."
    pub unit: String,
    /// Byte span of the whole token in the scanned line
    pub span: Range<usize>,
    pub path: MatchPath,
}

impl LengthMatch {
    pub fn value(&self) -> Option<f64> {
        self.number.replace(',', "").parse::<f64>().ok()
    }
}

/// Raw token matches on one line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineTokens {
    pub length: Option<LengthMatch>,
    pub length_text: Option<String>,
    pub diameter_text: Option<String>,
    pub diameter_in: Option<f64>,
    /// Canonical material from the primary alias pattern
    pub material: Option<String>,
    pub slope_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Candidate(CandidateRun),
    /// No length token
    NoLength,
    /// Length present but neither diameter nor material
    Ambiguous,
}

impl Recognition {
    pub fn into_candidate(self) -> Option<CandidateRun> {
        match self {
            Recognition::Candidate(run) => Some(run),
            _ => None,
        }
    }
}

pub struct TokenRecognizer {
    vocabulary: MaterialVocabulary,
    length_re: Regex,
    diameter_re: Regex,
    slope_re: Regex,
    material_re: Regex,
}

impl TokenRecognizer {
    pub fn new(vocabulary: &MaterialVocabulary) -> ExtractionResult<Self> {
        let material_pattern = format!(
            r"(?i)(?:^|[^A-Za-z0-9])(?P<mat>{})(?:[^A-Za-z0-9]|$)",
            vocabulary.alias_alternation()
        );
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ExtractionError::Config(e.to_string()))
        };

        Ok(Self {
            vocabulary: vocabulary.clone(),
            length_re: compile(LENGTH_PATTERN)?,
            diameter_re: compile(DIAMETER_PATTERN)?,
            slope_re: compile(SLOPE_PATTERN)?,
            material_re: compile(&material_pattern)?,
        })
    }

    pub fn vocabulary(&self) -> &MaterialVocabulary {
        &self.vocabulary
    }

    /// Find length / diameter / material / slope tokens on an already
    /// whitespace-collapsed line
    pub fn scan(&self, line: &str) -> LineTokens {
        let length = self.find_length(line);
        let length_text = length.as_ref().map(|m| line[m.span.clone()].to_string());

        let (diameter_text, diameter_in) = match self.diameter_re.captures(line) {
            Some(caps) => {
                let dia = caps.name("dia").map(|m| (m.start(), m.as_str()));
                let mark_end = caps.name("mark").map(|m| m.end());
                match (dia, mark_end) {
                    (Some((start, digits)), Some(end)) => {
                        (Some(line[start..end].to_string()), digits.parse::<f64>().ok())
                    }
                    _ => (None, None),
                }
            }
            None => (None, None),
        };

        let material = self
            .material_re
            .captures(line)
            .and_then(|caps| caps.name("mat").map(|m| self.vocabulary.normalize(m.as_str())));

        let slope_text = self.slope_re.find(line).map(|m| m.as_str().to_string());

        LineTokens {
            length,
            length_text,
            diameter_text,
            diameter_in,
            material,
            slope_text,
        }
    }

    pub fn recognize(&self, line: &RawLine, policy: CuePolicy) -> Recognition {
        self.recognize_text(line.text(), line.origin(), line.dpi(), line.source_bbox(), policy)
    }

    pub fn recognize_text(
        &self,
        text: &str,
        origin: LineOrigin,
        dpi: Option<u32>,
        source_bbox: Option<BoundingBox>,
        policy: CuePolicy,
    ) -> Recognition {
        let normalized = collapse_whitespace(text);
        let tokens = self.scan(&normalized);

        let Some(length) = tokens.length.as_ref() else {
            return Recognition::NoLength;
        };

        let cue = || self.vocabulary.cue_material(&normalized).map(str::to_string);
        let material = match policy {
            CuePolicy::Gate => tokens.material.clone().or_else(cue),
            CuePolicy::FillOnly => {
                if tokens.diameter_in.is_none() && tokens.material.is_none() {
                    return Recognition::Ambiguous;
                }
                tokens.material.clone().or_else(cue)
            }
        };

        if tokens.diameter_in.is_none() && material.is_none() {
            return Recognition::Ambiguous;
        }

        Recognition::Candidate(CandidateRun {
            length_text: tokens.length_text.clone(),
            length_ft: length.value(),
            diameter_text: tokens.diameter_text.clone(),
            diameter_in: tokens.diameter_in,
            material,
            slope_text: tokens.slope_text.clone(),
            raw_text: normalized,
            origin,
            dpi,
            source_bbox,
        })
    }

    fn find_length(&self, line: &str) -> Option<LengthMatch> {
        if let Some(caps) = self.length_re.captures(line) {
            let number = caps.name("number")?;
            let unit = caps.name("unit")?;
            return Some(LengthMatch {
                number: number.as_str().to_string(),
                unit: unit.as_str().to_string(),
                span: number.start()..unit.end(),
                path: MatchPath::Pattern,
            });
        }
        scan_length_tokens(line)
    }
}

/// Byte ranges of whitespace-separated tokens
fn token_ranges(line: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                ranges.push(s..i);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push(s..line.len());
    }
    ranges
}

fn is_number_token(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
        && token.replace(',', "").parse::<f64>().is_ok()
}

fn unit_key(token: &str) -> String {
    token
        .trim_end_matches([',', ';', ':'])
        .replace('.', "")
        .to_uppercase()
}

/// Manual path for unit markers the regex cannot see: `215 L.F.`, `215 L F`
fn scan_length_tokens(line: &str) -> Option<LengthMatch> {
    let ranges = token_ranges(line);
    for (i, number) in ranges.iter().enumerate() {
        if !is_number_token(&line[number.clone()]) {
            continue;
        }
        let Some(next) = ranges.get(i + 1) else {
            continue;
        };
        let unit_end = if unit_key(&line[next.clone()]) == "LF" {
            Some(next.end)
        } else if unit_key(&line[next.clone()]) == "L" {
            ranges
                .get(i + 2)
                .filter(|r| unit_key(&line[(*r).clone()]) == "F")
                .map(|r| r.end)
        } else {
            None
        };
        if let Some(end) = unit_end {
            return Some(LengthMatch {
                number: line[number.clone()].to_string(),
                unit: line[next.start..end].to_string(),
                span: number.start..end,
                path: MatchPath::TokenScan,
            });
        }
    }
    None
}
