//! Offline term-frequency estimate.
//!
//! Always available and fully deterministic: the same chunks and parameters
//! always produce the same [`RawResponse`]. Topics are the most frequent
//! content words, weighted by their share of the selected counts. Confidence
//! stays low since this is a heuristic, not a model.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{AnalysisBackend, BackendError, BackendKind, RawBody, RawResponse, MOCK_BACKEND_ID};
use crate::models::{AnalysisParams, TextChunk};

const MIN_TERM_CHARS: usize = 4;
const SUMMARY_SENTENCES: usize = 2;
const SUMMARY_EXCERPT_CHARS: usize = 400;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "among", "because", "been", "before",
    "being", "below", "between", "both", "but", "could", "does", "doing", "down", "during",
    "each", "either", "every", "from", "further", "have", "having", "here", "into", "itself",
    "just", "many", "more", "most", "much", "must", "neither", "only", "other", "over", "same",
    "shall", "should", "some", "such", "than", "that", "their", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "under", "until", "upon", "very",
    "were", "what", "when", "where", "which", "while", "will", "with", "within", "without",
    "would", "your", "yours",
];

#[derive(Debug, Default)]
pub struct MockBackend;

impl MockBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnalysisBackend for MockBackend {
    fn id(&self) -> &str {
        MOCK_BACKEND_ID
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    async fn analyze(
        &self,
        chunks: &[TextChunk],
        params: &AnalysisParams,
    ) -> Result<RawResponse, BackendError> {
        let text: String = chunks.iter().map(|c| c.body()).collect();
        Ok(RawResponse::single(RawBody::Json(estimate(
            &text,
            params.max_topics.max(1),
        ))))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Build the estimate as the same JSON shape the LLM backends are asked for.
fn estimate(text: &str, max_topics: usize) -> serde_json::Value {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for token in &tokens {
        if is_content_word(token) {
            *counts.entry(token.as_str()).or_default() += 1;
        }
    }
    if counts.is_empty() {
        // Short or numeric-only text: fall back to any non-numeric token
        for token in &tokens {
            if token.chars().any(|c| c.is_alphabetic()) {
                *counts.entry(token.as_str()).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // BTreeMap order makes ties alphabetical under a stable sort
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(max_topics);

    let topics: Vec<serde_json::Value> = if ranked.is_empty() {
        vec![serde_json::json!({ "name": "General", "weight": 1.0, "confidence": 0.1 })]
    } else {
        let selected: usize = ranked.iter().map(|(_, n)| n).sum();
        let top = ranked[0].1;
        ranked
            .iter()
            .map(|(term, n)| {
                serde_json::json!({
                    "name": title_case(term),
                    "weight": *n as f64 / selected as f64,
                    "confidence": 0.2 + 0.3 * (*n as f64 / top as f64),
                })
            })
            .collect()
    };

    let names: Vec<String> = ranked.iter().map(|(t, _)| title_case(t)).collect();
    serde_json::json!({
        "topics": topics,
        "summary": summary(text, &names),
        "question_formats": question_formats(text, &tokens),
    })
}

fn is_content_word(token: &str) -> bool {
    token.chars().count() >= MIN_TERM_CHARS
        && token.chars().any(|c| c.is_alphabetic())
        && !STOPWORDS.contains(&token)
}

fn title_case(term: &str) -> String {
    let mut chars = term.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn summary(text: &str, names: &[String]) -> String {
    let mut excerpt = String::new();
    let mut sentences = 0;
    for (i, c) in text.char_indices() {
        if excerpt.len() >= SUMMARY_EXCERPT_CHARS {
            break;
        }
        excerpt.push(if c.is_whitespace() { ' ' } else { c });
        if matches!(c, '.' | '!' | '?')
            && text[i + c.len_utf8()..]
                .chars()
                .next()
                .map_or(true, char::is_whitespace)
        {
            sentences += 1;
            if sentences == SUMMARY_SENTENCES {
                break;
            }
        }
    }
    let excerpt = excerpt.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut out = String::from("Offline estimate.");
    if !names.is_empty() {
        out.push_str(&format!(" Frequent terms: {}.", names.join(", ")));
    }
    if !excerpt.is_empty() {
        out.push_str(&format!(" Opening: {}", excerpt));
    }
    out
}

fn question_formats(text: &str, tokens: &[String]) -> Vec<&'static str> {
    let mut formats = vec!["Multiple Choice", "Short Answer", "Essay"];

    let numeric = tokens
        .iter()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .count();
    if !tokens.is_empty() && numeric * 20 >= tokens.len() {
        formats.push("Numerical Problems");
    }

    let lower = text.to_lowercase();
    if ["defined as", "refers to", "definition"]
        .iter()
        .any(|cue| lower.contains(cue))
    {
        formats.push("Definitions");
    }
    formats
}
