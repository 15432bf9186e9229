// Embeddings module
// Character-window chunking plus the embedding providers that turn chunks into vectors

pub mod chunking;
pub mod ollama;

use anyhow::Result;

pub use chunking::{ChunkingConfig, ContentChunk, chunk_document, chunk_documents};
pub use ollama::{EmbeddingResult, OllamaClient};

/// Maps text to a fixed-dimension vector.
///
/// Implementations must be deterministic: the same model and input always
/// produce the same vector, otherwise re-ingestion would not be reproducible.
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors
    fn model_name(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order. One vector per input.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}
