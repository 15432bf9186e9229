// LanceDB vector database module
// Handles vector storage and similarity search for embeddings


pub mod vector_store;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embeddings::chunking::ContentChunk;

pub use vector_store::{CollectionManifest, SearchResult, StorePhase, VectorStore};

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Identifier derived from the source path and chunk index
    pub id: String,
    /// The vector embedding; its width is fixed by the embedding model
    pub vector: Vec<f32>,
    /// Metadata about the chunk this embedding represents
    pub metadata: ChunkMetadata,
}

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the source document
    pub source: String,
    /// Knowledge base category of the source document
    pub category: String,
    /// Index of this chunk within its document
    pub chunk_index: u32,
    /// Character offset of the chunk within its document
    pub offset: u32,
    /// The actual text content of the chunk
    pub content: String,
}

impl EmbeddingRecord {
    #[inline]
    pub fn from_chunk(chunk: &ContentChunk, vector: Vec<f32>) -> Self {
        let source = chunk.metadata.source.to_string_lossy().into_owned();
        Self {
            id: stable_chunk_id(&source, chunk.chunk_index),
            vector,
            metadata: ChunkMetadata {
                source,
                category: chunk.metadata.category.clone(),
                chunk_index: u32::try_from(chunk.chunk_index).unwrap_or(u32::MAX),
                offset: u32::try_from(chunk.offset).unwrap_or(u32::MAX),
                content: chunk.content.clone(),
            },
        }
    }
}

/// Same source and chunk index always map to the same id
#[inline]
pub fn stable_chunk_id(source: &str, chunk_index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{source}#{chunk_index}").as_bytes(),
    )
    .to_string()
}
