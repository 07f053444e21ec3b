//! Lexical-similarity recovery of missed OCR callouts
//!
//! When a DPI pass finds too few runs, every OCR line of that pass is ranked
//! against a set of phrase templates (Okapi BM25 over lowercase word tokens).
//! The top line per template is re-processed and kept only if it adds a
//! length not already collected. Best-effort and low confidence: this never
//! replaces direct scanning.

use crate::config::RecoveryConfig;
use crate::types::CandidateRun;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    /// Floor for negative idf values, as a fraction of the average idf
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// Lowercase alphanumeric words
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Okapi BM25 ranking index over a fixed set of lines
#[derive(Debug, Clone)]
pub struct Bm25Index {
    params: Bm25Params,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    pub fn build<S: AsRef<str>>(lines: &[S]) -> Self {
        Self::with_params(lines, Bm25Params::default())
    }

    pub fn with_params<S: AsRef<str>>(lines: &[S], params: Bm25Params) -> Self {
        let mut term_freqs = Vec::with_capacity(lines.len());
        let mut doc_lens = Vec::with_capacity(lines.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for line in lines {
            let tokens = tokenize(line.as_ref());
            doc_lens.push(tokens.len());
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let doc_count = lines.len() as f64;
        let total_len: usize = doc_lens.iter().sum();
        let avg_doc_len = if lines.is_empty() {
            0.0
        } else {
            total_len as f64 / doc_count
        };

        // Terms present in more than half the lines get a negative raw idf;
        // those are lifted to epsilon * average idf.
        let mut idf = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, n) in doc_freq {
            let n = n as f64;
            let value = ((doc_count - n + 0.5) / (n + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }
        if !idf.is_empty() {
            let floor = params.epsilon * idf_sum / idf.len() as f64;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            params,
            term_freqs,
            doc_lens,
            avg_doc_len,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Score of every line against the query, in line order
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let terms = tokenize(query);
        let Bm25Params { k1, b, .. } = self.params;

        self.term_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(freqs, &len)| {
                let norm = if self.avg_doc_len > 0.0 {
                    1.0 - b + b * len as f64 / self.avg_doc_len
                } else {
                    1.0
                };
                terms
                    .iter()
                    .map(|term| {
                        let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                        let idf = self.idf.get(term).copied().unwrap_or(0.0);
                        idf * tf * (k1 + 1.0) / (tf + k1 * norm)
                    })
                    .sum()
            })
            .collect()
    }

    /// Best line index and its score; ties go to the earliest line
    pub fn top(&self, query: &str) -> Option<(usize, f64)> {
        self.scores(query)
            .into_iter()
            .enumerate()
            .fold(None, |best, (idx, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((idx, score)),
            })
    }
}

/// Template-driven recovery step of one OCR pass
pub struct LexicalRecovery<'a> {
    config: &'a RecoveryConfig,
}

impl<'a> LexicalRecovery<'a> {
    pub fn new(config: &'a RecoveryConfig) -> Self {
        Self { config }
    }

    /// Too few candidates on a page that did produce a fair amount of text
    pub fn should_run(&self, candidates: usize, raw_lines: usize) -> bool {
        self.config.enabled
            && !self.config.templates.is_empty()
            && candidates < self.config.min_candidates
            && raw_lines >= self.config.min_raw_lines
    }

    /// Rank `lines` against every template and return the runs that
    /// `reprocess` recognizes on top-ranked lines, skipping any whose length
    /// is within tolerance of `collected` or of an earlier recovery.
    pub fn recover<F>(&self, lines: &[String], collected: &[CandidateRun], reprocess: F) -> Vec<CandidateRun>
    where
        F: Fn(&str) -> Option<CandidateRun>,
    {
        let index = Bm25Index::build(lines);
        let mut recovered: Vec<CandidateRun> = Vec::new();

        for template in &self.config.templates {
            let Some((idx, score)) = index.top(template) else {
                continue;
            };
            if score < self.config.min_score {
                tracing::debug!(
                    "recovery: best line for '{}' scored {:.2} (< {:.2})",
                    template,
                    score,
                    self.config.min_score
                );
                continue;
            }

            let line = &lines[idx];
            let Some(run) = reprocess(line) else {
                tracing::debug!("recovery: top line '{}' still has no callout", line);
                continue;
            };
            let Some(length) = run.length_ft else {
                continue;
            };

            let already_known = collected
                .iter()
                .chain(recovered.iter())
                .filter_map(|c| c.length_ft)
                .any(|existing| (existing - length).abs() < self.config.length_tolerance);
            if already_known {
                continue;
            }

            tracing::info!("🔎 Recovered run '{}' (score {:.2})", run.raw_text, score);
            recovered.push(run);
        }

        recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LineOrigin;

    fn run(raw: &str, length: f64) -> CandidateRun {
        CandidateRun {
            raw_text: raw.to_string(),
            length_text: Some(format!("{length} LF")),
            length_ft: Some(length),
            diameter_text: Some("8\"".into()),
            diameter_in: Some(8.0),
            material: Some("PVC".into()),
            slope_text: None,
            origin: LineOrigin::Ocr,
            dpi: Some(450),
            source_bbox: None,
        }
    }

    fn page_lines() -> Vec<String> {
        [
            "SHEET C-4 PROFILE",
            "STA 10+00",
            "MATCH LINE STA 12+50",
            "EX GROUND",
            "215 IF 8\" PVC SANITARY SEWER",
            "FINISHED GRADE",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("215 LF 8\" PVC @ 0.50%"),
            vec!["215", "lf", "8", "pvc", "0", "50"]
        );
        assert!(tokenize("  --  ").is_empty());
    }

    #[test]
    fn test_top_ranks_matching_line() {
        let index = Bm25Index::build(&page_lines());
        let (idx, score) = index.top("100 lf 8\" pvc sdr sanitary sewer").unwrap();
        assert_eq!(idx, 4);
        assert!(score > 1.5, "score was {score}");
    }

    #[test]
    fn test_unknown_terms_score_zero() {
        let index = Bm25Index::build(&page_lines());
        assert!(index.scores("culvert headwall").iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_common_terms_keep_positive_idf() {
        let lines = ["sta 1", "sta 2", "sta 3", "pvc 4"];
        let index = Bm25Index::build(&lines);
        let scores = index.scores("sta");
        assert!(scores[0] > 0.0);
        assert_eq!(scores[3], 0.0);
    }

    #[test]
    fn test_empty_index() {
        let index = Bm25Index::build::<&str>(&[]);
        assert!(index.is_empty());
        assert_eq!(index.top("lf"), None);
    }

    #[test]
    fn test_should_run_thresholds() {
        let config = RecoveryConfig::default();
        let recovery = LexicalRecovery::new(&config);
        assert!(recovery.should_run(2, 5));
        assert!(!recovery.should_run(3, 50));
        assert!(!recovery.should_run(0, 4));

        let disabled = RecoveryConfig {
            enabled: false,
            ..RecoveryConfig::default()
        };
        assert!(!LexicalRecovery::new(&disabled).should_run(0, 50));
    }

    #[test]
    fn test_recover_accepts_new_length() {
        let config = RecoveryConfig::default();
        let recovered = LexicalRecovery::new(&config).recover(&page_lines(), &[], |line| {
            line.starts_with("215").then(|| run(line, 215.0))
        });
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].length_ft, Some(215.0));
    }

    #[test]
    fn test_recover_skips_known_length() {
        let config = RecoveryConfig::default();
        let collected = vec![run("213 LF 8\" PVC", 213.0)];
        let recovered = LexicalRecovery::new(&config).recover(&page_lines(), &collected, |line| {
            line.starts_with("215").then(|| run(line, 215.0))
        });
        assert!(recovered.is_empty());
    }

    #[test]
    fn test_recover_respects_min_score() {
        let config = RecoveryConfig {
            min_score: 100.0,
            ..RecoveryConfig::default()
        };
        let recovered = LexicalRecovery::new(&config)
            .recover(&page_lines(), &[], |line| Some(run(line, 215.0)));
        assert!(recovered.is_empty());
    }
}
