//! Recursive character splitter.
//!
//! Text is split on the coarsest separator present (paragraph break, line
//! break, space, then single characters). Pieces are merged back greedily
//! up to `max_chars`, and consecutive chunks share a tail of up to
//! `overlap_chars`. Separators stay attached to the start of the piece that
//! follows them, so merged chunks reproduce the original spacing.

use crate::models::{Chunk, IngestionOptions};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestionOptions::default())
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Splits the text of one `(source, page)` into chunks without ids.
    pub fn split(&self, text: &str, source: &str, page: u32) -> Vec<Chunk> {
        self.split_text(text)
            .into_iter()
            .map(|piece| Chunk::new(source, page, piece))
            .collect()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (position, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                remaining = &separators[position + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.config.max_chars {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let max = self.config.max_chars;
        let overlap = self.config.overlap_chars;

        let mut merged = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut window_start = 0usize;
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > max && window.len() > window_start {
                let joined = window[window_start..].concat();
                let trimmed = joined.trim();
                if !trimmed.is_empty() {
                    merged.push(trimmed.to_string());
                }

                while window.len() > window_start
                    && (total > overlap || (total + len > max && total > 0))
                {
                    total -= char_len(window[window_start]);
                    window_start += 1;
                }
            }
            window.push(piece);
            total += len;
        }

        let joined = window[window_start..].concat();
        let trimmed = joined.trim();
        if !trimmed.is_empty() {
            merged.push(trimmed.to_string());
        }
        merged
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits `text` on `separator`, prefixing every piece after the first with
/// the separator that preceded it. Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|piece| !piece.is_empty());
    pieces
}
