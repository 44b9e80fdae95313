//! Mock implementations for testing
//!
//! These mocks enable workflow testing without network calls. Each one
//! records what it was asked so tests can assert call counts.

use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, RequestPurpose};
use crate::retrieval::{
    EmbeddingService, Payload, RerankError, RerankHit, Reranker, RetrievalError, ScopeFilter,
    ScoredPoint, VectorStore,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mock LLM
// ============================================================================

/// LLM double that answers by request purpose.
///
/// Replies scripted for a purpose are served in order; the last one
/// repeats once the others are used up.
#[derive(Default)]
pub struct MockLlm {
    scripts: Mutex<HashMap<RequestPurpose, VecDeque<Result<String, LlmError>>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `purpose`
    #[must_use]
    pub fn on(self, purpose: RequestPurpose, text: &str) -> Self {
        self.push(purpose, Ok(text.to_string()));
        self
    }

    /// Queue a failure for `purpose`
    #[must_use]
    pub fn fail(self, purpose: RequestPurpose, error: LlmError) -> Self {
        self.push(purpose, Err(error));
        self
    }

    fn push(&self, purpose: RequestPurpose, reply: Result<String, LlmError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .push_back(reply);
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self, purpose: RequestPurpose) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.purpose == purpose)
            .count()
    }

    fn next_reply(&self, purpose: RequestPurpose) -> Result<LlmResponse, LlmError> {
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(&purpose) else {
            return Err(LlmError::network(format!(
                "No mock reply for {}",
                purpose.as_str()
            )));
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(Ok(text)) => Ok(LlmResponse::from_text(text)),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::network("Mock script empty")),
        }
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next_reply(request.purpose)
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Delayed Mock LLM (for cancellation and timeout testing)
// ============================================================================

/// Mock LLM that sleeps before answering
pub struct DelayedMockLlm {
    inner: MockLlm,
    delay: Duration,
    /// Purposes that are delayed; everything else answers immediately
    delayed: Vec<RequestPurpose>,
    /// Notified when a delayed request starts
    pub request_started: Arc<Notify>,
}

impl DelayedMockLlm {
    pub fn new(inner: MockLlm, delay: Duration, delayed: Vec<RequestPurpose>) -> Self {
        Self {
            inner,
            delay,
            delayed,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn call_count(&self, purpose: RequestPurpose) -> usize {
        self.inner.call_count(purpose)
    }
}

#[async_trait]
impl LlmService for DelayedMockLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        if self.delayed.contains(&request.purpose) {
            self.request_started.notify_waiters();
            tokio::time::sleep(self.delay).await;
        }
        self.inner.complete(request).await
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Mock Embeddings
// ============================================================================

/// Deterministic embeddings: a two-dimensional vector per text
#[derive(Default)]
pub struct MockEmbeddings {
    failing: bool,
    calls: AtomicUsize,
}

impl MockEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddings {
    #[allow(clippy::cast_precision_loss)]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(RetrievalError::Embedding("mock embeddings down".to_string()));
        }
        Ok(texts
            .iter()
            .map(|t| vec![1.0, t.len() as f32 / 100.0])
            .collect())
    }
}

// ============================================================================
// Mock Vector Store
// ============================================================================

struct StoredPoint {
    payload: Payload,
    /// Fixed score for seeded documents
    score: Option<f32>,
    vector: Vec<f32>,
}

/// In-memory vector store with scope filtering
#[derive(Default)]
pub struct MockVectorStore {
    points: Mutex<Vec<StoredPoint>>,
    failing: bool,
    queries: AtomicUsize,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Seed a document that always scores `score`
    #[must_use]
    pub fn with_document(self, conversation_id: &str, text: &str, score: f32) -> Self {
        self.points.lock().unwrap().push(StoredPoint {
            payload: Payload {
                text: text.to_string(),
                url: "https://docs.example.com".to_string(),
                chat_id: conversation_id.to_string(),
            },
            score: Some(score),
            vector: vec![],
        });
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn upsert(
        &self,
        ids: &[String],
        payloads: &[Payload],
        vectors: &[Vec<f32>],
    ) -> Result<(), RetrievalError> {
        if self.failing {
            return Err(RetrievalError::VectorStore("mock store down".to_string()));
        }
        if ids.len() != payloads.len() || ids.len() != vectors.len() {
            return Err(RetrievalError::VectorStore("mismatched upsert".to_string()));
        }
        let mut points = self.points.lock().unwrap();
        for (payload, vector) in payloads.iter().zip(vectors) {
            points.push(StoredPoint {
                payload: payload.clone(),
                score: None,
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        scope: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, RetrievalError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(RetrievalError::VectorStore("mock store down".to_string()));
        }
        let points = self.points.lock().unwrap();
        let mut hits: Vec<ScoredPoint> = points
            .iter()
            .filter(|p| scope.matches(&p.payload))
            .map(|p| ScoredPoint {
                payload: p.payload.clone(),
                score: p
                    .score
                    .unwrap_or_else(|| p.vector.iter().zip(vector).map(|(a, b)| a * b).sum()),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

// ============================================================================
// Mock Reranker
// ============================================================================

/// Reranker that returns a fixed index order, or fails
pub struct MockReranker {
    order: Option<Vec<usize>>,
    calls: Arc<AtomicUsize>,
}

impl MockReranker {
    pub fn with_order(order: Vec<usize>) -> Self {
        Self {
            order: Some(order),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            order: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, usable after the reranker is moved
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Reranker for MockReranker {
    #[allow(clippy::cast_precision_loss)]
    async fn rerank(
        &self,
        _query: &str,
        _texts: &[String],
        limit: usize,
    ) -> Result<Vec<RerankHit>, RerankError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(order) = &self.order else {
            return Err(RerankError("mock reranker down".to_string()));
        };
        Ok(order
            .iter()
            .take(limit)
            .enumerate()
            .map(|(rank, &index)| RerankHit {
                index,
                relevance_score: 1.0 - rank as f32 / 10.0,
            })
            .collect())
    }
}

// ============================================================================
// Tests for the doubles themselves
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_llm_last_reply_repeats() {
        let llm = MockLlm::new()
            .on(RequestPurpose::GradeAnswer, "first")
            .on(RequestPurpose::GradeAnswer, "second");
        let request = LlmRequest::prompt(RequestPurpose::GradeAnswer, "x");
        assert_eq!(llm.complete(&request).await.unwrap().text, "first");
        assert_eq!(llm.complete(&request).await.unwrap().text, "second");
        assert_eq!(llm.complete(&request).await.unwrap().text, "second");
        assert_eq!(llm.call_count(RequestPurpose::GradeAnswer), 3);
    }

    #[tokio::test]
    async fn test_mock_store_upsert_then_query_in_scope() {
        let store = MockVectorStore::new();
        store
            .upsert(
                &["1".to_string(), "2".to_string()],
                &[
                    Payload {
                        text: "near".to_string(),
                        url: "u".to_string(),
                        chat_id: "c1".to_string(),
                    },
                    Payload {
                        text: "other scope".to_string(),
                        url: "u".to_string(),
                        chat_id: "c2".to_string(),
                    },
                ],
                &[vec![1.0, 0.0], vec![1.0, 0.0]],
            )
            .await
            .unwrap();
        assert_eq!(store.point_count(), 2);

        let hits = store
            .query(&[1.0, 0.0], &ScopeFilter::conversation("c1"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.text, "near");
    }
}
