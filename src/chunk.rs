//! Word-bounded text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of at most `max_words`
//! words using one of two strategies:
//!
//! - **Word windows**: fixed windows of exactly `max_words` whitespace tokens
//!   (the last window may be shorter). Ignores sentence structure.
//! - **Sentence packing**: greedily packs whole sentences while the running
//!   word count stays within `max_words`. A sentence longer than the bound is
//!   emitted alone and never split.
//!
//! Both strategies preserve source order, number chunks contiguously from 0,
//! and return no chunks for empty or whitespace-only text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// `.`, `!` or `?` runs followed by whitespace or end of text.
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid sentence regex"));

/// Chunk boundary strategy, selected by `chunking.strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ChunkStrategy {
    #[default]
    #[serde(rename = "words")]
    WordWindow,
    #[serde(rename = "sentences")]
    SentencePacking,
}

/// Split text into chunks of at most `max_words` words.
/// A `max_words` of 0 is treated as 1.
pub fn chunk_text(text: &str, max_words: usize, strategy: ChunkStrategy) -> Vec<Chunk> {
    let max_words = max_words.max(1);
    let pieces = match strategy {
        ChunkStrategy::WordWindow => word_windows(text, max_words),
        ChunkStrategy::SentencePacking => pack_sentences(text, max_words),
    };
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| make_chunk(index, piece))
        .collect()
}

fn word_windows(text: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.chunks(max_words).map(|w| w.join(" ")).collect()
}

fn pack_sentences(text: &str, max_words: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0;

    for sentence in split_sentences(text) {
        let words = count_words(sentence);
        if !current.is_empty() && current_words + words > max_words {
            pieces.push(current.join(" "));
            current.clear();
            current_words = 0;
        }
        current.push(sentence);
        current_words += words;
    }

    if !current.is_empty() {
        pieces.push(current.join(" "));
    }
    pieces
}

/// Split text into trimmed sentences. Trailing text without terminal
/// punctuation forms the last sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut last_end = 0;

    for m in SENTENCE_END.find_iter(text) {
        let sentence = text[last_end..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        last_end = m.end();
    }

    let tail = text[last_end..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Characters of each chunk shown by `relay ingest --preview`.
pub const PREVIEW_CHARS: usize = 300;

/// The first `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

fn make_chunk(index: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        index,
        word_count: count_words(&text),
        char_count: text.chars().count(),
        text,
        hash,
    }
}
