use crate::config::{MaterialCue, MaterialVocabulary};

/// Normalization key: punctuation, spaces and hyphens stripped, uppercased.
/// "D.I.P." / "d i p" / "D-I-P" all become "DIP".
pub fn normalization_key(token: &str) -> String {
    token
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | ',' | ';' | ':') && !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

impl MaterialVocabulary {
    /// Map a material token to its canonical name. Tokens matching no
    /// alias pass through uppercased and unmapped.
    pub fn normalize(&self, token: &str) -> String {
        let key = normalization_key(token);
        for entry in &self.materials {
            if normalization_key(&entry.canonical) == key
                || entry.aliases.iter().any(|a| normalization_key(a) == key)
            {
                return entry.canonical.clone();
            }
        }
        token.trim().to_uppercase()
    }

    pub fn is_known(&self, material: &str) -> bool {
        self.materials.iter().any(|m| m.canonical == material)
    }

    /// Material implied by a secondary cue anywhere in the line
    pub fn cue_material(&self, line: &str) -> Option<&str> {
        let upper = line.to_uppercase();
        self.cues
            .iter()
            .find(|cue| cue_matches(cue, &upper))
            .map(|cue| cue.material.as_str())
    }

    /// Regex alternation over every canonical name and alias, longest first
    /// so "DUCTILE IRON PIPE" wins over "DUCTILE IRON".
    pub(crate) fn alias_alternation(&self) -> String {
        let mut names: Vec<&str> = self
            .materials
            .iter()
            .flat_map(|m| std::iter::once(m.canonical.as_str()).chain(m.aliases.iter().map(String::as_str)))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        names.dedup();

        names
            .into_iter()
            .map(alias_to_pattern)
            .collect::<Vec<_>>()
            .join("|")
    }
}

fn cue_matches(cue: &MaterialCue, upper_line: &str) -> bool {
    !cue.all_of.is_empty()
        && cue
            .all_of
            .iter()
            .all(|word| upper_line.contains(&word.to_uppercase()))
}

/// Words may be separated by any whitespace (or none); a trailing period is optional.
fn alias_to_pattern(alias: &str) -> String {
    let (body, optional_dot) = match alias.strip_suffix('.') {
        Some(body) => (body, true),
        None => (alias, false),
    };
    let mut pattern = body
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s*");
    if optional_dot {
        pattern.push_str(r"\.?");
    }
    pattern
}
