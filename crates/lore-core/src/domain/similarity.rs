//! Vector and token similarity helpers

use std::collections::BTreeSet;

/// Words too common to carry meaning in keyword matching
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "into", "is", "it",
    "of", "on", "or", "the", "this", "to", "use", "using", "with",
];

/// Compute cosine similarity between two vectors
///
/// Vectors of different length, or with zero magnitude, have similarity 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// Lowercased word tokens, without stop words or single characters
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || matches!(c, '#' | '+')))
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Fraction of `wanted` tokens present in `available` (0.0 when `wanted` is empty)
pub fn token_overlap(wanted: &BTreeSet<String>, available: &BTreeSet<String>) -> f32 {
    if wanted.is_empty() {
        return 0.0;
    }
    let shared = wanted.intersection(available).count();
    shared as f32 / wanted.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("Use JWT auth in Express, with C# and node.js!");
        assert!(tokens.contains("jwt"));
        assert!(tokens.contains("auth"));
        assert!(tokens.contains("express"));
        assert!(tokens.contains("c#"));
        assert!(tokens.contains("node"));
        assert!(tokens.contains("js"));
        assert!(!tokens.contains("use"));
        assert!(!tokens.contains("in"));
    }

    #[test]
    fn test_token_overlap() {
        let wanted = tokenize("jwt express");
        let available = tokenize("JWT refresh tokens");
        assert!((token_overlap(&wanted, &available) - 0.5).abs() < 1e-6);
        assert_eq!(token_overlap(&BTreeSet::new(), &available), 0.0);
    }
}
