//! Plain-text chunker for the `ingest` command.
//!
//! Splits text on Unicode sentence boundaries and packs sentences into
//! chunks of at most `max_chars` characters, recording the 1-based line
//! each chunk starts on.

use unicode_segmentation::UnicodeSegmentation;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_CHARS: usize = 1_000;

/// One chunk of a text document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Chunk text (trimmed).
    pub content: String,
    /// 1-based line the chunk starts on.
    pub line: u32,
}

/// Splits `text` into sentence-aligned chunks.
///
/// A single sentence longer than `max_chars` becomes its own chunk and is
/// split on character boundaries.
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_start = 0usize;

    for (start, sentence) in text.split_sentence_bound_indices() {
        let sentence_len = sentence.chars().count();

        if sentence_len > max_chars {
            push_chunk(&mut chunks, text, current_start, &mut current);
            let chars: Vec<(usize, char)> = sentence.char_indices().collect();
            for piece in chars.chunks(max_chars) {
                let offset = start + piece.first().map_or(0, |(i, _)| *i);
                let mut piece_text: String = piece.iter().map(|(_, c)| c).collect();
                push_chunk(&mut chunks, text, offset, &mut piece_text);
            }
            continue;
        }

        if current.chars().count() + sentence_len > max_chars {
            push_chunk(&mut chunks, text, current_start, &mut current);
        }
        if current.is_empty() {
            current_start = start;
        }
        current.push_str(sentence);
    }
    push_chunk(&mut chunks, text, current_start, &mut current);
    chunks
}

fn push_chunk(chunks: &mut Vec<TextChunk>, text: &str, start: usize, buffer: &mut String) {
    let content = buffer.trim();
    if !content.is_empty() {
        // Skip leading whitespace so the line points at the first visible char.
        let leading = buffer.len() - buffer.trim_start().len();
        let line = line_at(text, start + leading);
        chunks.push(TextChunk {
            content: content.to_string(),
            line,
        });
    }
    buffer.clear();
}

fn line_at(text: &str, byte_offset: usize) -> u32 {
    let end = byte_offset.min(text.len());
    let newlines = text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count();
    u32::try_from(newlines + 1).unwrap_or(u32::MAX)
}
