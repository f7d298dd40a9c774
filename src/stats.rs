//! Readability metrics for extracted text.
//!
//! Shown by `studyctl extract` next to the extraction status so a student can
//! gauge how dense a document is before analyzing it.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextComplexity {
    pub word_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub avg_word_length: f64,
    pub avg_sentence_length: f64,
    /// `min(100, avg_word_length * 10 + avg_sentence_length)`.
    pub complexity_score: u32,
}

/// Returns `None` for text without any words.
pub fn text_complexity(text: &str) -> Option<TextComplexity> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let sentence_count = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let paragraph_count = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .count();

    let letters: usize = words.iter().map(|w| w.chars().count()).sum();
    let avg_word_length = letters as f64 / words.len() as f64;
    let avg_sentence_length = words.len() as f64 / sentence_count as f64;
    let score = (avg_word_length * 10.0 + avg_sentence_length).min(100.0);

    Some(TextComplexity {
        word_count: words.len(),
        sentence_count,
        paragraph_count,
        avg_word_length: round2(avg_word_length),
        avg_sentence_length: round2(avg_sentence_length),
        complexity_score: score as u32,
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
