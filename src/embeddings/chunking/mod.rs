#[cfg(test)]
mod tests;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::knowledge::{Document, DocumentMetadata};

/// A window of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// The window text
    pub content: String,
    /// Metadata of the document this window was cut from
    pub metadata: DocumentMetadata,
    /// The index of this chunk within its document
    pub chunk_index: usize,
    /// Offset of the first character of the window, in characters
    pub offset: usize,
}

impl ContentChunk {
    /// Length of the window in characters
    #[inline]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Configuration for content chunking
///
/// Both sizes count characters, not bytes or tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum window length
    pub chunk_size: usize,
    /// Characters shared by consecutive windows of the same document
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    /// Distance between the starts of consecutive windows
    #[inline]
    pub fn step(&self) -> Result<usize> {
        if self.chunk_size == 0 {
            bail!("Chunk size must be greater than zero");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        Ok(self.chunk_size - self.chunk_overlap)
    }
}

/// Split every document into overlapping windows
#[inline]
pub fn chunk_documents(
    documents: &[Document],
    config: &ChunkingConfig,
) -> Result<Vec<ContentChunk>> {
    let mut chunks = Vec::new();

    for document in documents {
        let document_chunks = chunk_document(document, config).with_context(|| {
            format!(
                "Failed to chunk document: {}",
                document.metadata.source.display()
            )
        })?;
        chunks.extend(document_chunks);
    }

    debug!(
        "Chunked {} documents into {} chunks (avg {} tokens)",
        documents.len(),
        chunks.len(),
        chunks
            .iter()
            .map(|c| estimate_token_count(&c.content))
            .sum::<usize>()
            / chunks.len().max(1)
    );

    Ok(chunks)
}

/// Split a single document into overlapping windows
#[inline]
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Result<Vec<ContentChunk>> {
    let chunks = split_windows(&document.content, config)?
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (offset, window))| ContentChunk {
            content: window.to_string(),
            metadata: document.metadata.clone(),
            chunk_index,
            offset,
        })
        .collect();

    Ok(chunks)
}

/// Cut `text` into character windows of at most `chunk_size` characters.
///
/// Windows start every `chunk_size - chunk_overlap` characters and the last
/// window ends exactly at the end of the text. Returns `(char offset, window)`
/// pairs; empty text produces no windows.
#[inline]
pub fn split_windows<'a>(text: &'a str, config: &ChunkingConfig) -> Result<Vec<(usize, &'a str)>> {
    let step = config.step()?;

    // Byte position of every char boundary, including the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;

    let mut windows = Vec::with_capacity(total_chars / step + 1);
    let mut start = 0;

    while start < total_chars {
        let end = (start + config.chunk_size).min(total_chars);
        let window = text
            .get(boundaries[start]..boundaries[end])
            .context("Window does not fall on character boundaries")?;
        windows.push((start, window));

        if end == total_chars {
            break;
        }
        start += step;
    }

    Ok(windows)
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
