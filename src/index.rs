//! Retrieval index over the loaded document.
//!
//! [`VectorIndex`] chunks the document, embeds every chunk once at startup
//! and answers queries by brute-force cosine similarity, which is plenty for
//! a single document. The HTTP layer only sees the [`Retriever`] trait.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, embed_in_batches, embed_query, EmbeddingProvider};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index not created. Build the index before querying.")]
    NotReady,
    #[error("cannot build an index from empty text")]
    EmptyCorpus,
    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),
}

/// Anything that can return the passages most relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `top_k` chunk texts, most similar first.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, IndexError>;
}

struct IndexedChunk {
    index: usize,
    text: String,
    vector: Vec<f32>,
}

/// A chunk returned by [`VectorIndex::search`] with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Position of the chunk in the document.
    pub index: usize,
    pub text: String,
    pub score: f32,
}

/// In-memory vector index built once from the document text.
pub struct VectorIndex {
    provider: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    batch_size: usize,
    entries: RwLock<Option<Vec<IndexedChunk>>>,
}

impl VectorIndex {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            chunking,
            batch_size,
            entries: RwLock::new(None),
        }
    }

    /// Chunk and embed `text`, replacing any previous contents.
    ///
    /// Returns the number of indexed chunks.
    pub async fn build(&self, text: &str) -> Result<usize, IndexError> {
        let chunks = chunk_text(
            text,
            self.chunking.max_tokens,
            self.chunking.overlap_tokens,
        );
        if chunks.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_in_batches(self.provider.as_ref(), &texts, self.batch_size)
            .await
            .map_err(IndexError::Embedding)?;

        let entries: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk {
                index: chunk.index,
                text: chunk.text,
                vector,
            })
            .collect();
        let count = entries.len();

        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = Some(entries);

        tracing::info!(
            chunks = count,
            model = self.provider.model_name(),
            "retrieval index built"
        );
        Ok(count)
    }

    pub fn is_ready(&self) -> bool {
        self.entries
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rank all chunks against `query` and return the best `top_k`.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if !self.is_ready() {
            return Err(IndexError::NotReady);
        }

        let query_vec = embed_query(self.provider.as_ref(), query)
            .await
            .map_err(IndexError::Embedding)?;

        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entries = guard.as_ref().ok_or(IndexError::NotReady)?;

        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|entry| ScoredChunk {
                index: entry.index,
                text: entry.text.clone(),
                score: cosine_similarity(&query_vec, &entry.vector),
            })
            .collect();
        // Equal scores keep document order.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("model", &self.provider.model_name())
            .field("chunks", &self.len())
            .finish()
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, IndexError> {
        let results = self.search(query, top_k).await?;
        Ok(results.into_iter().map(|c| c.text).collect())
    }
}
