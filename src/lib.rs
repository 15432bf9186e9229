use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Chat completion error: {0}")]
    Chat(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error(
        "Embedding dimension mismatch: store holds {expected}-dimensional vectors but got {actual}. Re-run ingestion after changing the embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod answer;
pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod knowledge;
pub mod retrieval;
