// Database module
// LanceDB-backed vector storage for chunk embeddings

pub mod lancedb;

pub use lancedb::{ChunkMetadata, EmbeddingRecord, VectorStore};
