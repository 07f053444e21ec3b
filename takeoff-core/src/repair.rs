//! OCR noise repair
//!
//! An ordered pipeline of pure text rewrites applied to every OCR line before
//! token recognition. The order is part of the contract: length repairs run
//! before the diameter repair, and reordering changes results on ambiguous
//! input such as `2l5LF8"`.
//!
//! ```text
//! "2l5LF8\" PVC"
//!     ↓ GluedLengthUnit      "2l5 LF8\" PVC"
//!     ↓ ConfusableDigits     "215 LF8\" PVC"
//!     ↓ GluedDiameterUnit    "215 LF 8\" PVC"
//! ```

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;

// Number whose digits may have been read as o/O/l/L/i/I: starts on a word
// boundary and holds at least one real digit. The LF marker must not run on
// into another letter ("LF8" is fine, "LFT" is not).
static GLUED_LENGTH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?P<number>\b[0-9oOlLiI]*[0-9][0-9oOlLiI]*?)(?P<unit>LF)(?P<rest>[^A-Za-z]|$)")
        .unwrap()
});

static CONFUSABLE_LENGTH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<number>\b[0-9oOlLiI]*[0-9][0-9oOlLiI]*?)(?P<sep>\s*)(?P<unit>LF)(?P<rest>[^A-Za-z]|$)",
    )
    .unwrap()
});

static GLUED_DIAMETER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?P<unit>LF)(?P<dia>\d{1,2}\s*(?:"|”|“|″|''))"#).unwrap()
});

// Unit marker misread as "IF", "1F", "|F" or "LE", standing apart from its
// number. Too loose for direct scanning; used only on lines the recovery
// ranking already picked out.
static CONFUSABLE_UNIT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\b\d[\d,.]*)(?P<sep>\s+)(?:IF|1F|\|F|LE|lF|If|Lf|LF)(?P<rest>[^A-Za-z]|$)")
        .unwrap()
});

/// One rewrite step
pub trait RewriteRule: Send + Sync {
    fn apply<'a>(&self, line: &'a str) -> Cow<'a, str>;

    fn name(&self) -> &str;
}

/// Inserts a space where OCR glued the number to the LF marker: `215LF` → `215 LF`
pub struct GluedLengthUnit;

impl RewriteRule for GluedLengthUnit {
    fn apply<'a>(&self, line: &'a str) -> Cow<'a, str> {
        GLUED_LENGTH_REGEX.replace_all(line, "${number} ${unit}${rest}")
    }

    fn name(&self) -> &str {
        "GluedLengthUnit"
    }
}

/// Letter-for-digit substitution inside the number right before LF:
/// `2l5 LF` → `215 LF`, `1O0 LF` → `100 LF`
pub struct ConfusableDigits;

pub fn substitute_confusables(number: &str) -> String {
    number
        .chars()
        .map(|c| match c {
            'i' | 'I' | 'l' | 'L' => '1',
            'o' | 'O' => '0',
            other => other,
        })
        .collect()
}

impl RewriteRule for ConfusableDigits {
    fn apply<'a>(&self, line: &'a str) -> Cow<'a, str> {
        CONFUSABLE_LENGTH_REGEX.replace_all(line, |caps: &Captures| {
            format!(
                "{}{}{}{}",
                substitute_confusables(&caps["number"]),
                &caps["sep"],
                &caps["unit"],
                &caps["rest"]
            )
        })
    }

    fn name(&self) -> &str {
        "ConfusableDigits"
    }
}

/// Inserts a space where the diameter was glued to the LF marker: `LF8"` → `LF 8"`
pub struct GluedDiameterUnit;

impl RewriteRule for GluedDiameterUnit {
    fn apply<'a>(&self, line: &'a str) -> Cow<'a, str> {
        GLUED_DIAMETER_REGEX.replace_all(line, "${unit} ${dia}")
    }

    fn name(&self) -> &str {
        "GluedDiameterUnit"
    }
}

/// `215 IF 8"` → `215 LF 8"`
pub struct ConfusableUnitMarker;

impl RewriteRule for ConfusableUnitMarker {
    fn apply<'a>(&self, line: &'a str) -> Cow<'a, str> {
        CONFUSABLE_UNIT_REGEX.replace_all(line, "${number}${sep}LF${rest}")
    }

    fn name(&self) -> &str {
        "ConfusableUnitMarker"
    }
}

/// Ordered list of rewrite rules
pub struct RepairPipeline {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RepairPipeline {
    pub fn new(rules: Vec<Box<dyn RewriteRule>>) -> Self {
        Self { rules }
    }

    /// Length-then-diameter order used for every OCR line
    pub fn ocr_default() -> Self {
        Self::new(vec![
            Box::new(GluedLengthUnit),
            Box::new(ConfusableDigits),
            Box::new(GluedDiameterUnit),
        ])
    }

    /// Default order preceded by the unit-marker repair, for recovery lines
    pub fn recovery() -> Self {
        Self::new(vec![
            Box::new(ConfusableUnitMarker),
            Box::new(GluedLengthUnit),
            Box::new(ConfusableDigits),
            Box::new(GluedDiameterUnit),
        ])
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn apply(&self, line: &str) -> String {
        let mut current = line.to_string();
        for rule in &self.rules {
            let rewritten = rule.apply(&current);
            if let Cow::Owned(next) = rewritten {
                if next != current {
                    tracing::trace!("repair {}: '{}' -> '{}'", rule.name(), current, next);
                }
                current = next;
            }
        }
        current
    }
}

impl Default for RepairPipeline {
    fn default() -> Self {
        Self::ocr_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glued_length_unit() {
        let rule = GluedLengthUnit;
        assert_eq!(rule.apply("215LF 8\" DIP"), "215 LF 8\" DIP");
        assert_eq!(rule.apply("215Lf 8\" DIP"), "215 Lf 8\" DIP");
        assert_eq!(rule.apply("2l5LF"), "2l5 LF");
        assert_eq!(rule.apply("215LF8\" PVC"), "215 LF8\" PVC");
        // already separated: untouched
        assert!(matches!(rule.apply("215 LF"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_glued_length_unit_ignores_words() {
        let rule = GluedLengthUnit;
        assert_eq!(rule.apply("SHELF 8\""), "SHELF 8\"");
        assert_eq!(rule.apply("OLF"), "OLF");
        assert_eq!(rule.apply("12LFT"), "12LFT");
    }

    #[test]
    fn test_confusable_digits() {
        let rule = ConfusableDigits;
        assert_eq!(rule.apply("2l5 LF 8\" PVC"), "215 LF 8\" PVC");
        assert_eq!(rule.apply("1O0 LF"), "100 LF");
        assert_eq!(rule.apply("I2i LF"), "121 LF");
    }

    #[test]
    fn test_confusable_digits_leaves_other_words() {
        let rule = ConfusableDigits;
        // "PL1" starts mid-word, so the L is not part of a number
        assert_eq!(rule.apply("PL1 LF"), "PL1 LF");
        assert_eq!(rule.apply("OIL 8\" PVC"), "OIL 8\" PVC");
    }

    #[test]
    fn test_glued_diameter_unit() {
        let rule = GluedDiameterUnit;
        assert_eq!(rule.apply("215 LF8\" PVC"), "215 LF 8\" PVC");
        assert_eq!(rule.apply("215 LF12” RCP"), "215 LF 12” RCP");
        assert_eq!(rule.apply("215 LF 8\" PVC"), "215 LF 8\" PVC");
    }

    #[test]
    fn test_pipeline_order() {
        let pipeline = RepairPipeline::ocr_default();
        assert_eq!(
            pipeline.rule_names(),
            vec!["GluedLengthUnit", "ConfusableDigits", "GluedDiameterUnit"]
        );
        assert_eq!(pipeline.apply("2l5LF8\" PVC"), "215 LF 8\" PVC");
        assert_eq!(pipeline.apply("215Lf 8\" DIP"), "215 Lf 8\" DIP");
    }

    #[test]
    fn test_confusable_unit_marker() {
        let rule = ConfusableUnitMarker;
        assert_eq!(rule.apply("215 IF 8\" PVC"), "215 LF 8\" PVC");
        assert_eq!(rule.apply("215 1F"), "215 LF");
        assert_eq!(rule.apply("40 LE 12\" RCP"), "40 LF 12\" RCP");
        // glued digits are not split apart
        assert_eq!(rule.apply("21F"), "21F");
        assert_eq!(rule.apply("8\" PVC IF NEEDED"), "8\" PVC IF NEEDED");
    }

    #[test]
    fn test_recovery_pipeline() {
        let pipeline = RepairPipeline::recovery();
        assert_eq!(pipeline.rule_names()[0], "ConfusableUnitMarker");
        assert_eq!(pipeline.apply("2l5 IF 8\" PVC"), "2l5 IF 8\" PVC");
        assert_eq!(pipeline.apply("215 IF8\" PVC"), "215 LF 8\" PVC");
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let pipeline = RepairPipeline::ocr_default();
        let once = pipeline.apply("1O5LF8\" SIP @ 0.4%");
        let twice = pipeline.apply(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "105 LF 8\" SIP @ 0.4%");
    }
}
