// Retrieval
// Embeds a query and asks the vector store for its nearest chunks


use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::database::VectorStore;
use crate::database::lancedb::SearchResult;
use crate::embeddings::Embedder;
use crate::{RagError, Result};

/// Source of context chunks for a query
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Chunks relevant to `query`, nearest first
    async fn retrieve(&self, query: &str) -> Result<Vec<SearchResult>>;
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
    k: usize,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<VectorStore>, k: usize) -> Self {
        Self { embedder, store, k }
    }

    #[inline]
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<VectorStore>,
    ) -> Self {
        Self::new(embedder, store, config.retrieval.k)
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }
}

#[async_trait]
impl ContextRetriever for Retriever {
    #[inline]
    async fn retrieve(&self, query: &str) -> Result<Vec<SearchResult>> {
        debug!("Retrieving top {} chunks for query ({} chars)", self.k, query.len());

        let vector = self
            .embedder
            .embed(query)
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

        let results = self.store.query(&vector, self.k).await?;
        debug!("Retrieved {} chunks", results.len());
        Ok(results)
    }
}
