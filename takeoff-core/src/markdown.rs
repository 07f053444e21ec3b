//! Deterministic parser for vision-agent markdown takeoffs
//!
//! ```text
//! # Page 1
//! ## Pipes
//! ### Sanitary Pipe 1
//! - Diameter: 8 inches
//! - Material: PVC
//! - Length: 806.01 LF
//! ## Structures
//! ### Manhole: MH-SS-1
//! - Rim Elevation: 745.0 ft
//! ## Earthwork
//! ### Site Grading
//! - Cut Volume: 1,234 cubic yards
//! ## Summary
//! - Total Pipes: 1
//! ```
//!
//! A section runs until the next `#` or `##` heading, so `###` item headers
//! never end it. Sections repeated under several `# Page N` headings are
//! concatenated in document order.

use crate::config::MaterialVocabulary;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d[\d,]*(?:\.\d+)?|\.\d+)").unwrap());
static PIPE_HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(.*?)\s+Pipe\b").unwrap());
static STRUCTURE_HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*?):\s*(.+)$").unwrap());
static PAGE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^\s*#+\s+Page\s+(\d+)").unwrap());
static FIRM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\*\*Firm\*\*:\s*([^\n]+)").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionPipe {
    pub discipline: Option<String>,
    pub diameter_in: f64,
    pub material: String,
    #[serde(rename = "type")]
    pub pipe_type: String,
    pub length_ft: f64,
    pub depth_ft: f64,
    pub from: String,
    pub to: String,
    pub invert_in: Option<f64>,
    pub invert_out: Option<f64>,
    pub count: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionStructure {
    pub id: String,
    #[serde(rename = "type")]
    pub structure_type: String,
    pub discipline: String,
    pub rim_elevation: Option<f64>,
    pub invert_in: Option<f64>,
    pub invert_out: Option<f64>,
    pub invert_elevation: Option<f64>,
    pub depth_ft: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarthworkItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub volume_cy: Option<f64>,
    pub depth_ft: Option<f64>,
    pub length_ft: Option<f64>,
    pub purpose: Option<String>,
    pub cut_cy: Option<f64>,
    pub fill_cy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionMetadata {
    /// Distinct `# Page N` headings
    pub pages_processed: usize,
    pub total_pipes: u32,
    pub total_structures: u32,
    pub total_earthwork: u32,
    pub firm: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionTakeoff {
    pub pipes: Vec<VisionPipe>,
    pub structures: Vec<VisionStructure>,
    pub earthwork: Vec<EarthworkItem>,
    pub metadata: VisionMetadata,
}

/// One `### header` block with its `- Key: value` lines
#[derive(Debug, Clone, Default)]
struct ItemBlock {
    header: String,
    fields: Vec<(String, String)>,
}

impl ItemBlock {
    /// First value whose key matches, keys compared case- and
    /// whitespace-insensitively
    fn field(&self, key: &str) -> Option<&str> {
        let wanted = field_key(key);
        self.fields
            .iter()
            .find(|(k, _)| *k == wanted)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.field(key).and_then(leading_number)
    }
}

fn field_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Leading number of a value, thousands separators allowed
fn leading_number(value: &str) -> Option<f64> {
    let caps = LEADING_NUMBER.captures(value)?;
    caps[1].replace(',', "").parse().ok()
}

/// `- Key: value` → (normalized key, trimmed value)
fn bullet_field(line: &str) -> Option<(String, String)> {
    let body = line.trim_start().strip_prefix('-')?;
    let (key, value) = body.split_once(':')?;
    Some((field_key(key), value.trim().to_string()))
}

/// Heading level of a line (`## Pipes` → 2), if it is a heading
fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    let rest = &trimmed[level..];
    (level > 0 && (rest.is_empty() || rest.starts_with(char::is_whitespace))).then_some(level)
}

/// Body lines of every `## name` section, in document order
fn section_lines<'m>(markdown: &'m str, name: &str) -> Vec<&'m str> {
    let mut lines = Vec::new();
    let mut inside = false;

    for line in markdown.lines() {
        match heading_level(line) {
            Some(level) if level <= 2 => {
                let title = line.trim_start().trim_start_matches('#').trim();
                inside = level == 2 && title.eq_ignore_ascii_case(name);
            }
            _ if inside => lines.push(line),
            _ => {}
        }
    }

    lines
}

/// Split section lines into `###` blocks; lines before the first block are
/// ignored
fn item_blocks(lines: &[&str]) -> Vec<ItemBlock> {
    let mut blocks: Vec<ItemBlock> = Vec::new();

    for line in lines {
        if heading_level(line).is_some_and(|level| level >= 3) {
            blocks.push(ItemBlock {
                header: line.trim_start().trim_start_matches('#').trim().to_string(),
                fields: Vec::new(),
            });
        } else if let (Some(block), Some(field)) = (blocks.last_mut(), bullet_field(line)) {
            block.fields.push(field);
        }
    }

    blocks
}

pub struct MarkdownParser<'a> {
    vocabulary: &'a MaterialVocabulary,
}

impl<'a> MarkdownParser<'a> {
    pub fn new(vocabulary: &'a MaterialVocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn parse(&self, markdown: &str) -> VisionTakeoff {
        let takeoff = VisionTakeoff {
            pipes: item_blocks(&section_lines(markdown, "Pipes"))
                .iter()
                .map(|block| self.parse_pipe(block))
                .collect(),
            structures: item_blocks(&section_lines(markdown, "Structures"))
                .iter()
                .map(parse_structure)
                .collect(),
            earthwork: item_blocks(&section_lines(markdown, "Earthwork"))
                .iter()
                .map(parse_earthwork)
                .collect(),
            metadata: parse_metadata(markdown),
        };

        tracing::info!(
            "📝 Parsed {} pipes, {} structures, {} earthwork items",
            takeoff.pipes.len(),
            takeoff.structures.len(),
            takeoff.earthwork.len()
        );
        takeoff
    }

    fn parse_pipe(&self, block: &ItemBlock) -> VisionPipe {
        let discipline = PIPE_HEADER
            .captures(&block.header)
            .map(|caps| caps[1].trim().to_lowercase())
            .filter(|d| !d.is_empty());

        VisionPipe {
            discipline,
            diameter_in: block.number("Diameter").unwrap_or(0.0),
            material: block
                .field("Material")
                .map(|m| self.material(m))
                .unwrap_or_else(|| "Unknown".to_string()),
            pipe_type: block.field("Type").unwrap_or("Pipe").to_string(),
            length_ft: block.number("Length").unwrap_or(0.0),
            depth_ft: block.number("Depth").unwrap_or(0.0),
            from: block.field("From").unwrap_or_default().to_string(),
            to: block.field("To").unwrap_or_default().to_string(),
            invert_in: block.number("Invert In"),
            invert_out: block.number("Invert Out"),
            count: block.number("Count").unwrap_or(1.0),
        }
    }

    /// Whole value first ("Ductile Iron"), then its first word ("PVC SDR-35")
    fn material(&self, value: &str) -> String {
        let whole = self.vocabulary.normalize(value);
        if self.vocabulary.is_known(&whole) {
            return whole;
        }
        match value.split_whitespace().next() {
            Some(first) => self.vocabulary.normalize(first),
            None => "Unknown".to_string(),
        }
    }
}

fn parse_structure(block: &ItemBlock) -> VisionStructure {
    let (header_type, header_id) = STRUCTURE_HEADER
        .captures(&block.header)
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
        .unwrap_or_default();

    VisionStructure {
        id: block.field("ID").map(str::to_string).unwrap_or(header_id),
        structure_type: block
            .field("Type")
            .map(str::to_string)
            .or_else(|| (!header_type.is_empty()).then_some(header_type))
            .unwrap_or_else(|| "Unknown".to_string()),
        discipline: block.field("Discipline").unwrap_or("Unknown").to_string(),
        rim_elevation: block.number("Rim Elevation"),
        invert_in: block.number("Invert In"),
        invert_out: block.number("Invert Out"),
        invert_elevation: block.number("Invert Elevation"),
        depth_ft: block.number("Depth"),
    }
}

fn parse_earthwork(block: &ItemBlock) -> EarthworkItem {
    EarthworkItem {
        item_type: block.field("Type").unwrap_or("Unknown").to_string(),
        volume_cy: block.number("Volume"),
        depth_ft: block.number("Depth"),
        length_ft: block.number("Length"),
        purpose: block.field("Purpose").map(str::to_string),
        cut_cy: block.number("Cut Volume"),
        fill_cy: block.number("Fill Volume"),
    }
}

fn parse_metadata(markdown: &str) -> VisionMetadata {
    let pages: BTreeSet<u32> = PAGE_HEADING
        .captures_iter(markdown)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();

    let mut metadata = VisionMetadata {
        pages_processed: pages.len(),
        firm: FIRM.captures(markdown).map(|caps| caps[1].trim().to_string()),
        ..VisionMetadata::default()
    };

    // Totals are taken from the first bullet of each kind anywhere in the
    // document; "Total Earthwork Items" counts as earthwork.
    let mut seen = (false, false, false);
    for (key, value) in markdown.lines().filter_map(bullet_field) {
        let Some(total) = leading_number(&value).map(|n| n as u32) else {
            continue;
        };
        if key == "total pipes" && !seen.0 {
            metadata.total_pipes = total;
            seen.0 = true;
        } else if key == "total structures" && !seen.1 {
            metadata.total_structures = total;
            seen.1 = true;
        } else if key.starts_with("total earthwork") && !seen.2 {
            metadata.total_earthwork = total;
            seen.2 = true;
        }
    }

    metadata
}
