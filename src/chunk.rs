//! Boundary-aware text chunker.
//!
//! Splits extracted text into [`TextChunk`]s whose owned spans are at most
//! `max_chars` bytes. Splitting prefers paragraph boundaries (`\n\n`), then
//! sentence boundaries, and only hard-splits a single unit that is still too
//! long (at the last space when there is one, always on a UTF-8 boundary).
//! The one exception to the size bound: when `max_chars` is smaller than a
//! single multi-byte character, that character becomes a span of its own and
//! exceeds `max_chars`.
//!
//! Owned spans are adjacent and cover the input exactly, so concatenating
//! [`TextChunk::body`] in index order reproduces the source. With a non-zero
//! `overlap_chars`, each chunk after the first also carries that many bytes of
//! the preceding text as leading context.

use crate::models::{ExtractedText, TextChunk};

/// Chunk an [`ExtractedText`]. Empty text yields no chunks.
pub fn chunk(extracted: &ExtractedText, max_chars: usize, overlap_chars: usize) -> Vec<TextChunk> {
    chunk_text(&extracted.text, max_chars, overlap_chars)
}

/// Split text into ordered chunks with contiguous indices starting at 0.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<TextChunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);

    let mut units = Vec::new();
    for para in paragraph_spans(text) {
        if para.1 - para.0 <= max_chars {
            units.push(para);
            continue;
        }
        for sentence in sentence_spans(text, para) {
            if sentence.1 - sentence.0 <= max_chars {
                units.push(sentence);
            } else {
                units.extend(hard_spans(text, sentence, max_chars));
            }
        }
    }

    // Greedily pack units into spans of at most max_chars
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (start, end) in units {
        current = match current {
            Some((cur_start, _)) if end - cur_start <= max_chars => Some((cur_start, end)),
            Some(full) => {
                spans.push(full);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some(last) = current {
        spans.push(last);
    }

    spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| {
            let context_start = if index == 0 || overlap_chars == 0 {
                start
            } else {
                floor_char_boundary(text, start.saturating_sub(overlap_chars))
            };
            TextChunk {
                index,
                start,
                end,
                context_start,
                text: text[context_start..end].to_string(),
            }
        })
        .collect()
}

/// Paragraph spans, each including its trailing `\n\n` separator.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, sep) in text.match_indices("\n\n") {
        let end = i + sep.len();
        if end > start {
            spans.push((start, end));
            start = end;
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

/// Sentence spans within `(start, end)`. A sentence ends after a newline, or
/// after `.`/`!`/`?` plus the whitespace character that follows it.
fn sentence_spans(text: &str, (start, end): (usize, usize)) -> Vec<(usize, usize)> {
    let slice = &text[start..end];
    let mut spans = Vec::new();
    let mut sentence_start = 0;
    let mut chars = slice.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(i + 1),
            '.' | '!' | '?' => match chars.peek() {
                Some(&(j, next)) if next.is_whitespace() => {
                    chars.next();
                    Some(j + next.len_utf8())
                }
                _ => None,
            },
            _ => None,
        };
        if let Some(b) = boundary {
            spans.push((start + sentence_start, start + b));
            sentence_start = b;
        }
    }
    if sentence_start < slice.len() {
        spans.push((start + sentence_start, end));
    }
    spans
}

/// Hard split at `max_chars`, backing off to the last space or newline.
fn hard_spans(text: &str, (start, end): (usize, usize), max_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = start;

    while end - pos > max_chars {
        let limit = floor_char_boundary(text, pos + max_chars);
        let mut cut = text[pos..limit]
            .rfind(['\n', ' '])
            .map(|p| pos + p + 1)
            .unwrap_or(limit);
        if cut <= pos {
            // max_chars is narrower than the next character
            cut = pos + text[pos..].chars().next().map_or(1, char::len_utf8);
        }
        spans.push((pos, cut));
        pos = cut;
    }
    if pos < end {
        spans.push((pos, end));
    }
    spans
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
