//! Instruction text sent to LLM backends.

use crate::models::{AnalysisParams, TextChunk};

const SYSTEM_PROMPT: &str = "You are a study assistant. You read course material and \
estimate which topics an exam is most likely to cover. Reply with a single JSON object \
and nothing else.";

/// System message for chat-style APIs.
pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// Build the user instruction for one chunk of a document.
///
/// `part` and `parts` are 1-based position and total, so the model knows it
/// is seeing an excerpt.
pub fn chunk_prompt(chunk: &TextChunk, part: usize, parts: usize, params: &AnalysisParams) -> String {
    let categories = params
        .categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = String::with_capacity(chunk.text.len() + 600);
    prompt.push_str("Analyze the study material below");
    if parts > 1 {
        prompt.push_str(&format!(" (excerpt {} of {})", part, parts));
    }
    prompt.push_str(".\n");
    if !categories.is_empty() {
        prompt.push_str(&format!("Focus on: {}.\n", categories));
    }
    prompt.push_str(&format!(
        "Return at most {} topics. Respond with JSON of exactly this shape:\n",
        params.max_topics.max(1)
    ));
    prompt.push_str(
        r#"{"topics": [{"name": "<topic>", "weight": <0.0-1.0 share of exam emphasis>, "confidence": <0.0-1.0>}],
 "summary": "<two or three sentences>",
 "question_formats": ["<likely question format>", "..."]}
"#,
    );
    prompt.push_str("\n--- MATERIAL ---\n");
    prompt.push_str(&chunk.text);
    prompt.push_str("\n--- END ---\n");
    prompt
}
