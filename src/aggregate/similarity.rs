//! Title normalization and string similarity for deduplication.

use serde::{Deserialize, Serialize};

/// Normalize a finding title for comparison: lowercase, with every run
/// of non-alphanumeric characters collapsed to a single space.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_space = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// The configurable similarity function used by the deduplicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TitleSimilarity {
    /// Shared-word ratio over the longer title.
    #[default]
    WordOverlap,
    /// Normalized Levenshtein distance over characters.
    Levenshtein,
}

impl TitleSimilarity {
    /// Similarity of two already-normalized titles in `[0, 1]`.
    pub fn score(self, a: &str, b: &str) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        match self {
            TitleSimilarity::WordOverlap => word_overlap(a, b),
            TitleSimilarity::Levenshtein => levenshtein_similarity(a, b),
        }
    }
}

fn word_overlap(a: &str, b: &str) -> f64 {
    let a_words: Vec<&str> = a.split_whitespace().collect();
    let b_words: Vec<&str> = b.split_whitespace().collect();
    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }
    let common = a_words.iter().filter(|w| b_words.contains(w)).count();
    common as f64 / a_words.len().max(b_words.len()) as f64
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let distance = levenshtein(a, b);
    let max_len = a.chars().count().max(b.chars().count());
    1.0 - distance as f64 / max_len as f64
}

/// Classic two-row Levenshtein over characters.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_punctuation_and_case() {
        assert_eq!(normalize_title("Missing null check"), "missing null check");
        assert_eq!(normalize_title("missing null-check"), "missing null check");
        assert_eq!(normalize_title("  SQL--injection!! "), "sql injection");
        assert_eq!(normalize_title("===="), "");
    }

    #[test]
    fn identical_normalized_titles_score_one() {
        let a = normalize_title("Missing null check");
        let b = normalize_title("missing null-check");
        assert_eq!(TitleSimilarity::WordOverlap.score(&a, &b), 1.0);
        assert_eq!(TitleSimilarity::Levenshtein.score(&a, &b), 1.0);
    }

    #[test]
    fn word_overlap_partial() {
        let score = TitleSimilarity::WordOverlap.score("missing null check", "null check here too");
        // 2 shared words over max(3, 4).
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unrelated_titles_score_low() {
        let score =
            TitleSimilarity::WordOverlap.score("missing null check", "unbounded allocation");
        assert_eq!(score, 0.0);
        let score = TitleSimilarity::Levenshtein.score("abc", "xyz");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn empty_titles_edge_cases() {
        assert_eq!(TitleSimilarity::WordOverlap.score("", ""), 1.0);
        assert_eq!(TitleSimilarity::WordOverlap.score("", "x"), 0.0);
    }

    #[test]
    fn similarity_function_deserializes_from_kebab_case() {
        let s: TitleSimilarity = serde_json::from_str("\"word-overlap\"").unwrap();
        assert_eq!(s, TitleSimilarity::WordOverlap);
        let s: TitleSimilarity = serde_json::from_str("\"levenshtein\"").unwrap();
        assert_eq!(s, TitleSimilarity::Levenshtein);
    }
}
