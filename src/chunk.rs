//! Paragraph-boundary text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s that respect a `max_tokens` limit.
//! Splitting prefers paragraph boundaries (`\n\n`); paragraphs longer than
//! the limit are hard-split on the last newline or space that fits. When a
//! chunk is flushed, its trailing `overlap_tokens` worth of text (aligned to
//! a word start) seeds the next chunk so that passages spanning a boundary
//! stay retrievable.

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks with contiguous indices starting at 0.
///
/// Blank input yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens.min(max_tokens.saturating_sub(1)) * CHARS_PER_TOKEN;

    let pieces: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .flat_map(|p| split_oversized(p, max_chars))
        .collect();

    let mut chunks = Vec::new();
    let mut buf = String::new();

    for piece in pieces {
        if !buf.is_empty() && buf.len() + 2 + piece.len() > max_chars {
            let tail = overlap_tail(&buf, overlap_chars).to_string();
            push_chunk(&mut chunks, &buf);
            buf = tail;
            // Drop the overlap rather than overflow the limit.
            if !buf.is_empty() && buf.len() + 2 + piece.len() > max_chars {
                buf.clear();
            }
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(piece);
    }

    if !buf.is_empty() {
        push_chunk(&mut chunks, &buf);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<Chunk>, text: &str) {
    chunks.push(Chunk {
        index: chunks.len(),
        text: text.to_string(),
    });
}

/// Hard-split a paragraph into pieces no longer than `max_chars` bytes.
fn split_oversized(para: &str, max_chars: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut remaining = para;

    while remaining.len() > max_chars {
        let limit = floor_char_boundary(remaining, max_chars);
        // Try to split at a newline or space boundary
        let split_at = remaining[..limit]
            .rfind('\n')
            .or_else(|| remaining[..limit].rfind(' '))
            .filter(|&pos| pos > 0)
            .map(|pos| pos + 1)
            .unwrap_or(limit);

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() {
        out.push(remaining);
    }
    out
}

/// Last `overlap_chars` bytes of `text`, advanced to the next word start.
fn overlap_tail(text: &str, overlap_chars: usize) -> &str {
    if overlap_chars == 0 {
        return "";
    }
    if text.len() <= overlap_chars {
        return text.trim();
    }

    let mut start = text.len() - overlap_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim(),
        None => tail.trim(),
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
