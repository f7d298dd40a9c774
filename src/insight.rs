//! Normalization of untrusted backend answers into [`InsightRecord`]s.
//!
//! Backends are free-form: an LLM may wrap its JSON in prose or code fences,
//! report weights as percentages, repeat a topic under different casing, or
//! send strings where numbers belong. Everything is validated here and
//! rejected field by field rather than trusted.
//!
//! # Accepted shapes
//!
//! Per answer part, topics are read from either
//!
//! ```json
//! {"topics": [{"name": "Osmosis", "weight": 0.4, "confidence": 0.8}]}
//! ```
//!
//! or the parallel-list form
//!
//! ```json
//! {"key_topics": ["Osmosis", "Diffusion"], "weightage": [60, 40]}
//! ```
//!
//! `question_formats` may be a list of names or a `{name: share}` map, which
//! is ordered by share.
//!
//! # Rules
//!
//! - If any weight in a part exceeds 1, the part is on a percent scale and all
//!   its weights are divided by 100. Weights and confidences are then clamped
//!   to `[0, 1]`. Non-finite or non-numeric values drop the topic.
//! - Topic names are deduplicated case-insensitively, keeping the highest
//!   weight.
//! - Parts from a chunked analysis are merged with weights averaged by each
//!   part's share of the document.
//! - Topics are sorted by weight descending, ties by name, and cut to
//!   `max_topics`.
//! - The summary is truncated on a word boundary to `summary_max_chars`.
//! - A response with no usable topic is rejected.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::backend::{RawBody, RawResponse};
use crate::models::{InsightRecord, TopicInsight};

const DEFAULT_CONFIDENCE: f64 = 0.5;
const MAX_QUESTION_FORMATS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub max_topics: usize,
    pub summary_max_chars: usize,
}

#[derive(Debug, Default)]
struct ParsedPart {
    topics: Vec<TopicInsight>,
    summary: Option<String>,
    question_formats: Vec<String>,
}

/// Validate and merge a raw backend response.
///
/// Returns the rejection reason on failure; the caller attaches the backend
/// id.
pub fn normalize(
    raw: &RawResponse,
    backend_used: &str,
    backend_requested: &str,
    options: NormalizeOptions,
) -> Result<InsightRecord, String> {
    let mut parsed = Vec::with_capacity(raw.parts.len());
    let mut last_reason = "empty response".to_string();

    for (i, part) in raw.parts.iter().enumerate() {
        match parse_part(&part.body) {
            Ok(p) if !p.topics.is_empty() => parsed.push((sanitize_share(part.share), p)),
            Ok(_) => {
                last_reason = "no usable topics".to_string();
                debug!(part = i, "response part has no usable topics");
            }
            Err(reason) => {
                debug!(part = i, %reason, "rejected response part");
                last_reason = reason;
            }
        }
    }

    if parsed.is_empty() {
        return Err(last_reason);
    }

    let topics = merge_topics(&parsed, options.max_topics.max(1));

    let summary = parsed
        .iter()
        .filter_map(|(_, p)| p.summary.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let mut question_formats: Vec<String> = Vec::new();
    for (_, p) in &parsed {
        for f in &p.question_formats {
            if question_formats.len() < MAX_QUESTION_FORMATS
                && !question_formats.iter().any(|q| q.eq_ignore_ascii_case(f))
            {
                question_formats.push(f.clone());
            }
        }
    }

    Ok(InsightRecord {
        topics,
        summary: truncate_summary(&summary, options.summary_max_chars),
        question_formats,
        backend_used: backend_used.to_string(),
        backend_requested: backend_requested.to_string(),
        fallback_used: backend_used != backend_requested,
        generated_at: Utc::now(),
    })
}

fn sanitize_share(share: f64) -> f64 {
    if share.is_finite() && share > 0.0 {
        share
    } else {
        0.0
    }
}

fn merge_topics(parts: &[(f64, ParsedPart)], max_topics: usize) -> Vec<TopicInsight> {
    let mut total_share: f64 = parts.iter().map(|(s, _)| s).sum();
    let equal = total_share <= 0.0;
    if equal {
        total_share = parts.len() as f64;
    }

    // key -> (display name, name weight, weighted sum, max confidence)
    let mut merged: HashMap<String, (String, f64, f64, f64)> = HashMap::new();
    for (share, part) in parts {
        let share = if equal { 1.0 } else { *share };
        for topic in &part.topics {
            let entry = merged
                .entry(topic.name.to_lowercase())
                .or_insert_with(|| (topic.name.clone(), f64::MIN, 0.0, 0.0));
            if topic.weight > entry.1 {
                entry.0 = topic.name.clone();
                entry.1 = topic.weight;
            }
            entry.2 += share * topic.weight;
            entry.3 = entry.3.max(topic.confidence);
        }
    }

    let mut topics: Vec<TopicInsight> = merged
        .into_values()
        .map(|(name, _, sum, confidence)| TopicInsight {
            name,
            weight: clamp_unit(sum / total_share),
            confidence,
        })
        .collect();
    sort_topics(&mut topics);
    topics.truncate(max_topics);
    topics
}

fn sort_topics(topics: &mut [TopicInsight]) {
    topics.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn parse_part(body: &RawBody) -> Result<ParsedPart, String> {
    let owned;
    let value = match body {
        RawBody::Json(v) => v,
        RawBody::Text(text) => {
            owned = extract_json_object(text)?;
            &owned
        }
    };
    let obj = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let topics = if let Some(list) = obj.get("topics").and_then(Value::as_array) {
        parse_topic_list(list, obj.get("weightage").or_else(|| obj.get("weights")))
    } else if let Some(list) = obj.get("key_topics").and_then(Value::as_array) {
        parse_topic_list(list, obj.get("weightage").or_else(|| obj.get("weights")))
    } else {
        return Err("missing topics".to_string());
    };

    let summary = obj
        .get("summary")
        .and_then(Value::as_str)
        .map(str::to_string);

    let question_formats = obj
        .get("question_formats")
        .or_else(|| obj.get("question_types"))
        .map(parse_question_formats)
        .unwrap_or_default();

    Ok(ParsedPart {
        topics,
        summary,
        question_formats,
    })
}

/// Locate the outermost `{...}` in free text and parse it.
fn extract_json_object(text: &str) -> Result<Value, String> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(v);
    }
    let start = text.find('{').ok_or_else(|| "no JSON object in text".to_string())?;
    let end = text.rfind('}').ok_or_else(|| "no JSON object in text".to_string())?;
    if end <= start {
        return Err("no JSON object in text".to_string());
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| format!("invalid JSON: {}", e))
}

fn parse_topic_list(list: &[Value], parallel_weights: Option<&Value>) -> Vec<TopicInsight> {
    let parallel: Option<&Vec<Value>> = parallel_weights.and_then(Value::as_array);
    let equal_weight = 1.0 / list.len().max(1) as f64;

    // (name, raw weight, confidence)
    let mut raw: Vec<(String, f64, f64)> = Vec::new();
    for (i, item) in list.iter().enumerate() {
        let parsed = match item {
            Value::String(name) => {
                let weight = match parallel {
                    Some(ws) => ws.get(i).and_then(number),
                    None => Some(equal_weight),
                };
                weight.map(|w| (name.clone(), w, DEFAULT_CONFIDENCE))
            }
            Value::Object(o) => {
                let name = ["name", "topic", "title"]
                    .iter()
                    .find_map(|k| o.get(*k).and_then(Value::as_str))
                    .map(str::to_string);
                let weight = ["weight", "weightage", "score"]
                    .iter()
                    .find_map(|k| o.get(*k))
                    .map(number)
                    .unwrap_or_else(|| match parallel {
                        Some(ws) => ws.get(i).and_then(number),
                        None => Some(equal_weight),
                    });
                let confidence = match o.get("confidence") {
                    Some(c) => number(c),
                    None => Some(DEFAULT_CONFIDENCE),
                };
                match (name, weight, confidence) {
                    (Some(n), Some(w), Some(c)) => Some((n, w, c)),
                    _ => None,
                }
            }
            _ => None,
        };
        match parsed {
            Some((name, w, c)) if !name.trim().is_empty() => {
                raw.push((name.trim().to_string(), w, c))
            }
            _ => debug!(index = i, "dropped invalid topic entry"),
        }
    }

    let percent = raw.iter().any(|(_, w, _)| *w > 1.0);
    let mut by_key: HashMap<String, TopicInsight> = HashMap::new();
    for (name, weight, confidence) in raw {
        let weight = clamp_unit(if percent { weight / 100.0 } else { weight });
        let confidence = clamp_unit(if confidence > 1.0 {
            confidence / 100.0
        } else {
            confidence
        });
        let candidate = TopicInsight {
            name,
            weight,
            confidence,
        };
        by_key
            .entry(candidate.name.to_lowercase())
            .and_modify(|existing| {
                if candidate.weight > existing.weight {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }

    let mut topics: Vec<TopicInsight> = by_key.into_values().collect();
    sort_topics(&mut topics);
    topics
}

/// A finite number, accepting numeric strings such as `"40"` or `"40%"`.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn parse_question_formats(value: &Value) -> Vec<String> {
    let names: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::Object(map) => {
            let mut ranked: Vec<(&String, f64)> = map
                .iter()
                .filter_map(|(k, v)| number(v).map(|n| (k, n)))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            ranked.into_iter().map(|(k, _)| k.clone()).collect()
        }
        _ => Vec::new(),
    };
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

/// Cut to at most `max_chars` characters, preferring the last word boundary
/// and marking the cut with an ellipsis.
pub fn truncate_summary(summary: &str, max_chars: usize) -> String {
    if summary.chars().count() <= max_chars {
        return summary.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let budget = max_chars - 1;
    let cut = summary
        .char_indices()
        .nth(budget)
        .map_or(summary.len(), |(i, _)| i);
    let head = &summary[..cut];
    let head = match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };
    format!("{}…", head.trim_end())
}
