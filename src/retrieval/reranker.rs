//! Reranking port, a Cohere-compatible `/rerank` client, and a disabled
//! stand-in for deployments without one.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One reranked candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    /// Position in the texts passed to `rerank`
    pub index: usize,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rerank failed: {0}")]
pub struct RerankError(pub String);

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Best-first hits, at most `limit` of them
    async fn rerank(
        &self,
        query: &str,
        texts: &[String],
        limit: usize,
    ) -> Result<Vec<RerankHit>, RerankError>;

    /// False when no reranking service is configured at all
    fn is_enabled(&self) -> bool {
        true
    }
}

pub struct HttpReranker {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpReranker {
    pub fn new(base_url: &str, model: String, api_key: Option<String>) -> Result<Self, RerankError> {
        Ok(Self {
            client: super::http_client(30).map_err(RerankError)?,
            endpoint: format!("{}/rerank", base_url.trim_end_matches('/')),
            model,
            api_key,
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        texts: &[String],
        limit: usize,
    ) -> Result<Vec<RerankHit>, RerankError> {
        let limit = limit.min(texts.len());
        if limit == 0 {
            return Ok(vec![]);
        }

        let request = RerankRequest {
            model: &self.model,
            query,
            documents: texts,
            top_n: limit,
        };
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RerankError(format!("Request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RerankError(format!("HTTP {}: {body}", status.as_u16())));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| RerankError(format!("Failed to parse response: {e}")))?;

        Ok(parsed
            .results
            .into_iter()
            .take(limit)
            .map(|r| RerankHit {
                index: r.index,
                relevance_score: r.relevance_score,
            })
            .collect())
    }
}

/// Reports itself disabled so the retriever keeps vector order. Calling
/// `rerank` anyway fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    async fn rerank(
        &self,
        _query: &str,
        _texts: &[String],
        _limit: usize,
    ) -> Result<Vec<RerankHit>, RerankError> {
        Err(RerankError("Reranking is not configured".to_string()))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        // Unroutable endpoint: any network call would fail
        let reranker = HttpReranker::new("http://127.0.0.1:9", "m".to_string(), None).unwrap();
        let hits = reranker.rerank("q", &[], 5).await.unwrap();
        assert!(hits.is_empty());

        let hits = reranker.rerank("q", &["a".to_string()], 0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_reranker_fails() {
        let err = DisabledReranker
            .rerank("q", &["a".to_string()], 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert!(!DisabledReranker.is_enabled());

        let configured = HttpReranker::new("http://127.0.0.1:9", "m".to_string(), None).unwrap();
        assert!(configured.is_enabled());
    }

    #[test]
    fn test_response_parsing() {
        let parsed: RerankResponse = serde_json::from_str(
            r#"{"id":"x","results":[{"index":2,"relevance_score":0.91},{"index":0,"relevance_score":0.4}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].index, 2);
    }
}
