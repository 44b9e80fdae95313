//! Vector store port and a Qdrant adapter over its REST API

use super::RetrievalError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Stored alongside each vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub text: String,
    pub url: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub payload: Payload,
    pub score: f32,
}

/// Restricts a query to one conversation's documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    conversation_id: String,
}

impl ScopeFilter {
    pub fn conversation(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
        }
    }

    #[cfg(test)]
    pub fn matches(&self, payload: &Payload) -> bool {
        payload.chat_id == self.conversation_id
    }

    fn to_qdrant(&self) -> Value {
        json!({
            "must": [
                { "key": "chat_id", "match": { "value": self.conversation_id } }
            ]
        })
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        ids: &[String],
        payloads: &[Payload],
        vectors: &[Vec<f32>],
    ) -> Result<(), RetrievalError>;

    /// Nearest points within `scope`, best first
    async fn query(
        &self,
        vector: &[f32],
        scope: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, RetrievalError>;
}

pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(
        base_url: &str,
        collection: String,
        api_key: Option<String>,
    ) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: super::http_client(30).map_err(RetrievalError::VectorStore)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
            api_key,
        })
    }

    fn points_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}/points{suffix}", self.base_url, self.collection)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<String, RetrievalError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| RetrievalError::VectorStore(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RetrievalError::VectorStore(format!("Failed to read response: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(RetrievalError::VectorStore(format!(
                "HTTP {}: {body}",
                status.as_u16()
            )))
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(
        &self,
        ids: &[String],
        payloads: &[Payload],
        vectors: &[Vec<f32>],
    ) -> Result<(), RetrievalError> {
        if ids.len() != payloads.len() || ids.len() != vectors.len() {
            return Err(RetrievalError::VectorStore(format!(
                "Mismatched upsert: {} ids, {} payloads, {} vectors",
                ids.len(),
                payloads.len(),
                vectors.len()
            )));
        }

        let points: Vec<Value> = ids
            .iter()
            .zip(payloads)
            .zip(vectors)
            .map(|((id, payload), vector)| json!({ "id": id, "vector": vector, "payload": payload }))
            .collect();
        let builder = self
            .client
            .put(self.points_url("?wait=true"))
            .json(&json!({ "points": points }));
        self.send(builder).await?;

        tracing::debug!(collection = %self.collection, count = ids.len(), "Upserted points");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        scope: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, RetrievalError> {
        let body = json!({
            "query": vector,
            "filter": scope.to_qdrant(),
            "limit": limit,
            "with_payload": true,
        });
        let builder = self.client.post(self.points_url("/query")).json(&body);
        let text = self.send(builder).await?;
        parse_query_response(&text)
    }
}

fn parse_query_response(body: &str) -> Result<Vec<ScoredPoint>, RetrievalError> {
    let parsed: QueryResponse = serde_json::from_str(body)
        .map_err(|e| RetrievalError::VectorStore(format!("Failed to parse response: {e}")))?;

    let mut points: Vec<ScoredPoint> = parsed
        .result
        .points
        .into_iter()
        .filter_map(|p| {
            p.payload.map(|payload| ScoredPoint {
                payload,
                score: p.score,
            })
        })
        .collect();
    points.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(points)
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    points: Vec<QueryPoint>,
}

#[derive(Debug, Deserialize)]
struct QueryPoint {
    score: f32,
    payload: Option<Payload>,
}
