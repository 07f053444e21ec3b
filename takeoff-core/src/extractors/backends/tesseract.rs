//! Tesseract CLI backend
//!
//! Writes the rendered page to a scoped temp PNG and runs the `tesseract`
//! binary in TSV mode, which reports block / paragraph / line numbers for
//! every word. Requires `tesseract` on PATH (or `ocr.tesseract_path`).

use super::{OcrEngine, OcrWord};
use crate::config::OcrConfig;
use crate::error::{ExtractionError, ExtractionResult};
use image::{DynamicImage, ImageFormat};
use std::process::Command;

/// TSV row level for a single word
const WORD_LEVEL: u32 = 5;

pub struct TesseractCli {
    binary: String,
    language: String,
    engine_mode: u8,
    page_segmentation_mode: u8,
    preserve_interword_spaces: bool,
}

impl TesseractCli {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            language: config.language.clone(),
            engine_mode: config.engine_mode,
            page_segmentation_mode: config.page_segmentation_mode,
            preserve_interword_spaces: config.preserve_interword_spaces,
        }
    }

    /// Arguments after the input path
    pub fn arguments(&self, dpi: u32) -> Vec<String> {
        let mut args = vec![
            "stdout".to_string(),
            "-l".to_string(),
            self.language.clone(),
            "--oem".to_string(),
            self.engine_mode.to_string(),
            "--psm".to_string(),
            self.page_segmentation_mode.to_string(),
            "--dpi".to_string(),
            dpi.to_string(),
        ];
        if self.preserve_interword_spaces {
            args.push("-c".to_string());
            args.push("preserve_interword_spaces=1".to_string());
        }
        args.push("tsv".to_string());
        args
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::from_config(&OcrConfig::default())
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image: &DynamicImage, dpi: u32) -> ExtractionResult<Vec<OcrWord>> {
        // Dropped (and deleted) on every return path
        let temp_dir = tempfile::tempdir()?;
        let image_path = temp_dir.path().join("page.png");
        image
            .save_with_format(&image_path, ImageFormat::Png)
            .map_err(|e| ExtractionError::OcrEngine(format!("failed to write page image: {e}")))?;

        let output = Command::new(&self.binary)
            .arg(image_path.as_os_str())
            .args(self.arguments(dpi))
            .output()
            .map_err(|e| {
                ExtractionError::OcrEngine(format!(
                    "failed to run tesseract (is it installed? path='{}'): {}",
                    self.binary, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::OcrEngine(format!(
                "tesseract failed (exit code {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let words = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!("tesseract: {} words at {} DPI", words.len(), dpi);
        Ok(words)
    }

    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_healthy(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

/// Word rows of tesseract TSV output, in output order.
/// Header, non-word levels, blank text and malformed rows are skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    tsv.lines()
        .filter_map(|row| {
            let cols: Vec<&str> = row.split('\t').collect();
            if cols.len() < 12 {
                return None;
            }
            let level: u32 = cols[0].trim().parse().ok()?;
            if level != WORD_LEVEL {
                return None;
            }
            let text = cols[11..].join(" ");
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(OcrWord {
                text: text.to_string(),
                block: cols[2].trim().parse().ok()?,
                paragraph: cols[3].trim().parse().ok()?,
                line: cols[4].trim().parse().ok()?,
                confidence: cols[10].trim().parse().unwrap_or(-1.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t2550\t3300\t-1\t
2\t1\t1\t0\t0\t0\t100\t200\t900\t40\t-1\t
4\t1\t1\t1\t1\t0\t100\t200\t900\t40\t-1\t
5\t1\t1\t1\t1\t1\t100\t200\t120\t40\t91.5\t215LF
5\t1\t1\t1\t1\t2\t240\t200\t60\t40\t88\t8\"
5\t1\t1\t1\t1\t3\t320\t200\t90\t40\t90\tDIP
5\t1\t1\t1\t2\t1\t100\t260\t50\t40\t-1\t
5\t1\t2\t1\t1\t1\t100\t900\t80\t40\t77\tSTA
";

    #[test]
    fn test_parse_tsv_words_only() {
        let words = parse_tsv(SAMPLE_TSV);
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["215LF", "8\"", "DIP", "STA"]);
        assert_eq!(words[0].line_key(), (1, 1, 1));
        assert_eq!(words[3].line_key(), (2, 1, 1));
        assert_eq!(words[0].confidence, 91.5);
    }

    #[test]
    fn test_parse_tsv_ignores_garbage() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("not\ta\ttsv").is_empty());
        assert!(parse_tsv("5\t1\tx\t1\t1\t1\t0\t0\t0\t0\t90\tword").is_empty());
    }

    #[test]
    fn test_arguments_follow_config() {
        let cli = TesseractCli::default();
        let args = cli.arguments(450);
        assert_eq!(args.first().map(String::as_str), Some("stdout"));
        assert_eq!(args.last().map(String::as_str), Some("tsv"));
        let joined = args.join(" ");
        assert!(joined.contains("--oem 3"));
        assert!(joined.contains("--psm 6"));
        assert!(joined.contains("--dpi 450"));
        assert!(joined.contains("-c preserve_interword_spaces=1"));
    }

    #[test]
    fn test_missing_binary_is_engine_error() {
        let cli = TesseractCli::from_config(&OcrConfig {
            tesseract_path: "/nonexistent/tesseract-binary".to_string(),
            ..OcrConfig::default()
        });
        assert!(!cli.is_healthy());
        let image = DynamicImage::new_rgba8(4, 4);
        let err = cli.recognize(&image, 300).unwrap_err();
        assert!(matches!(err, ExtractionError::OcrEngine(_)));
    }
}
