//! Question to ordered documents: embed, search within the conversation,
//! rerank.

use super::{
    EmbeddingService, RerankError, RerankHit, Reranker, RetrievalError, ScopeFilter, ScoredPoint,
    VectorStore,
};
use crate::state_machine::Document;
use std::collections::HashSet;
use std::sync::Arc;

/// Candidate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalSettings {
    /// Vector search candidates (K)
    pub max_retrieved: usize,
    /// Documents kept after reranking (N)
    pub max_reranked: usize,
}

impl RetrievalSettings {
    pub const DEFAULT_MAX_RETRIEVED: usize = 10;
    pub const DEFAULT_MAX_RERANKED: usize = 5;

    /// N is clamped to K
    pub fn new(max_retrieved: usize, max_reranked: usize) -> Self {
        Self {
            max_retrieved,
            max_reranked: max_reranked.min(max_retrieved),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIEVED, Self::DEFAULT_MAX_RERANKED)
    }
}

pub struct Retriever {
    embeddings: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    reranker: Arc<dyn Reranker>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(
        embeddings: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
        reranker: Arc<dyn Reranker>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embeddings,
            store,
            reranker,
            settings,
        }
    }

    /// Up to N reranked documents. When reranking fails, all K candidates
    /// come back in vector order instead.
    pub async fn retrieve(
        &self,
        question: &str,
        conversation_id: &str,
    ) -> Result<Vec<Document>, RetrievalError> {
        let vector = self.embeddings.embed_query(question).await?;
        let candidates = self
            .store
            .query(
                &vector,
                &ScopeFilter::conversation(conversation_id),
                self.settings.max_retrieved,
            )
            .await?;

        if candidates.is_empty() {
            tracing::info!(conv_id = %conversation_id, "Vector search returned no candidates");
            return Ok(vec![]);
        }

        if !self.reranker.is_enabled() {
            tracing::debug!(
                conv_id = %conversation_id,
                candidates = candidates.len(),
                "Reranking disabled, using vector order"
            );
            return Ok(in_vector_order(candidates));
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.payload.text.clone()).collect();
        let reranked = self
            .reranker
            .rerank(question, &texts, self.settings.max_reranked)
            .await
            .and_then(|hits| reorder(&candidates, &hits, self.settings.max_reranked));

        match reranked {
            Ok(documents) => {
                tracing::debug!(
                    conv_id = %conversation_id,
                    candidates = candidates.len(),
                    kept = documents.len(),
                    "Reranked candidates"
                );
                Ok(documents)
            }
            Err(e) => {
                tracing::warn!(
                    conv_id = %conversation_id,
                    error = %e,
                    candidates = candidates.len(),
                    "Rerank failed, using vector order"
                );
                Ok(in_vector_order(candidates))
            }
        }
    }
}

fn in_vector_order(candidates: Vec<ScoredPoint>) -> Vec<Document> {
    candidates
        .into_iter()
        .map(|c| to_document(c.payload, c.score))
        .collect()
}

/// Apply rerank hits to the candidates. Indices must be in range and
/// distinct; anything else counts as a rerank failure.
fn reorder(
    candidates: &[ScoredPoint],
    hits: &[RerankHit],
    limit: usize,
) -> Result<Vec<Document>, RerankError> {
    let mut seen = HashSet::with_capacity(hits.len());
    let mut documents = Vec::with_capacity(hits.len().min(limit));

    for hit in hits.iter().take(limit) {
        let Some(candidate) = candidates.get(hit.index) else {
            return Err(RerankError(format!(
                "Index {} out of range for {} candidates",
                hit.index,
                candidates.len()
            )));
        };
        if !seen.insert(hit.index) {
            return Err(RerankError(format!("Duplicate index {}", hit.index)));
        }
        documents.push(to_document(candidate.payload.clone(), hit.relevance_score));
    }
    Ok(documents)
}

fn to_document(payload: super::Payload, score: f32) -> Document {
    Document {
        text: payload.text,
        source_url: payload.url,
        conversation_id: payload.chat_id,
        relevance_score: Some(score),
    }
}
