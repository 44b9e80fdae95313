//! Retrieval: embed the question, search the conversation's vectors,
//! rerank the candidates.
//!
//! Each external service sits behind a narrow trait so the workflow can be
//! tested with the doubles in `runtime::testing`.

mod embedding;
mod reranker;
mod retriever;
mod vector_store;

pub use embedding::{EmbeddingService, OpenAIEmbeddings};
pub use reranker::{DisabledReranker, HttpReranker, RerankError, RerankHit, Reranker};
pub use retriever::{RetrievalSettings, Retriever};
pub use vector_store::{Payload, QdrantStore, ScopeFilter, ScoredPoint, VectorStore};

use thiserror::Error;

/// Embedding or vector search failure. These propagate to the caller;
/// only reranking degrades gracefully.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Vector store failed: {0}")]
    VectorStore(String),
}

/// Build the shared HTTP client used by the retrieval adapters
fn http_client(timeout_secs: u64) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {e}"))
}
