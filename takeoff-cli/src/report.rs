// Document-level report written by the CLI: one entry per requested page,
// fingerprinted with the input's SHA-256 and stamped with the run time.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use takeoff_core::{PageExtraction, PageOutcome};

#[derive(Debug, Serialize)]
pub struct PageReport {
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<PageExtraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<PageOutcome> for PageReport {
    fn from(outcome: PageOutcome) -> Self {
        match outcome.result {
            Ok(extraction) => PageReport {
                page: outcome.page,
                extraction: Some(extraction),
                error: None,
            },
            Err(e) => PageReport {
                page: outcome.page,
                extraction: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentReport {
    pub input: String,
    pub sha256: String,
    pub extracted_at: DateTime<Utc>,
    pub pages: Vec<PageReport>,
}

impl DocumentReport {
    pub fn new(input: &Path, sha256: String, outcomes: Vec<PageOutcome>) -> Self {
        Self {
            input: input.display().to_string(),
            sha256,
            extracted_at: Utc::now(),
            pages: outcomes.into_iter().map(PageReport::from).collect(),
        }
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.error.is_some()).count()
    }

    pub fn total_length_ft(&self) -> f64 {
        self.pages
            .iter()
            .filter_map(|p| p.extraction.as_ref())
            .map(PageExtraction::total_length_ft)
            .sum()
    }

    pub fn save(&self, output_path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(output_path, json).with_context(|| format!("writing report to {output_path}"))?;
        Ok(())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(sha256_hex(&bytes))
}

/// `<input stem>[_<config stem>]_<suffix>.json`
pub fn default_output_path(input: &str, config: Option<&str>, suffix: &str) -> String {
    let input_name = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let config_suffix = config
        .and_then(|p| Path::new(p).file_stem())
        .and_then(|s| s.to_str())
        .map(|s| format!("_{s}"))
        .unwrap_or_default();
    format!("{input_name}{config_suffix}_{suffix}.json")
}
