use crate::error::IngestError;
use crate::models::{Chunk, Document, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use regex::Regex;
use std::collections::VecDeque;
use uuid::Uuid;

/// Paragraph, line, sentence, word, then a hard character cut.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ".", " ", ""];

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {chunk_overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Separators are tried in order; an empty string splits into characters.
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>, IngestError> {
    split_recursive(text, &config.separators, config)
}

/// Splits every document and stamps each piece with a fresh chunk id and the
/// parent's source metadata.
pub fn split_documents(
    documents: &[Document],
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();

    for document in documents {
        for text in split_text(&document.text, config)? {
            chunks.push(Chunk {
                chunk_id: Uuid::new_v4(),
                text,
                source_path: document.source_path.clone(),
                page_number: document.page_number,
            });
        }
    }

    Ok(chunks)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_recursive(
    text: &str,
    separators: &[String],
    config: &ChunkingConfig,
) -> Result<Vec<String>, IngestError> {
    let (separator, remaining) = pick_separator(text, separators);
    let pieces = split_keeping_separator(text, separator)?;

    let mut final_chunks = Vec::new();
    let mut fitting = Vec::new();

    for piece in pieces {
        if char_len(&piece) < config.chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            final_chunks.extend(merge_pieces(&fitting, config));
            fitting.clear();
        }

        if remaining.is_empty() {
            final_chunks.extend(hard_cut(&piece, config));
        } else {
            final_chunks.extend(split_recursive(&piece, remaining, config)?);
        }
    }

    if !fitting.is_empty() {
        final_chunks.extend(merge_pieces(&fitting, config));
    }

    Ok(final_chunks)
}

fn pick_separator<'s>(text: &str, separators: &'s [String]) -> (&'s str, &'s [String]) {
    for (index, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return ("", &[]);
        }
        if text.contains(separator.as_str()) {
            return (separator.as_str(), &separators[index + 1..]);
        }
    }

    (separators.last().map(String::as_str).unwrap_or(""), &[])
}

/// Splits on `separator`, keeping it at the start of the following piece.
fn split_keeping_separator(text: &str, separator: &str) -> Result<Vec<String>, IngestError> {
    if separator.is_empty() {
        return Ok(text.chars().map(String::from).collect());
    }

    let pattern = Regex::new(&regex::escape(separator))?;
    let mut pieces = Vec::new();
    let mut start = 0;

    for found in pattern.find_iter(text) {
        pieces.push(&text[start..found.start()]);
        start = found.start();
    }
    pieces.push(&text[start..]);

    Ok(pieces
        .into_iter()
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect())
}

/// Greedily packs pieces into chunks of at most `chunk_size` characters,
/// carrying up to `chunk_overlap` trailing characters into the next chunk.
fn merge_pieces(pieces: &[String], config: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);

        if total + len > config.chunk_size && !current.is_empty() {
            if let Some(chunk) = join_trimmed(&current) {
                chunks.push(chunk);
            }

            while total > config.chunk_overlap || (total + len > config.chunk_size && total > 0) {
                match current.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }

        current.push_back(piece.as_str());
        total += len;
    }

    if let Some(chunk) = join_trimmed(&current) {
        chunks.push(chunk);
    }

    chunks
}

fn join_trimmed(parts: &VecDeque<&str>) -> Option<String> {
    let joined = parts.iter().copied().collect::<String>();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Fixed-size character windows, used when no separator is left to try.
fn hard_cut(piece: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = piece.chars().collect();
    let step = config.chunk_size.saturating_sub(config.chunk_overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        if !window.trim().is_empty() {
            windows.push(window);
        }
        if end == chars.len() {
            break;
        }
        start = start.saturating_add(step);
    }

    windows
}
