//! Text embedding port and the `OpenAI`-compatible `/embeddings` adapter

use super::RetrievalError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Texts per embedding request
pub const EMBED_BATCH_SIZE: usize = 96;

/// Inputs are cut to this many characters before embedding
pub const EMBED_MAX_CHARS: usize = 2048;

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::Embedding("No vector returned for query".to_string()))
    }
}

pub struct OpenAIEmbeddings {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAIEmbeddings {
    pub fn new(
        base_url: &str,
        model: String,
        api_key: Option<String>,
    ) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: super::http_client(60).map_err(RetrievalError::Embedding)?,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            api_key,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch.iter().map(|t| truncate_chars(t, EMBED_MAX_CHARS)).collect(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Failed to parse response: {e}")))?;

        order_embeddings(parsed.data, batch.len())
    }
}

#[async_trait]
impl EmbeddingService for OpenAIEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        tracing::debug!(count = texts.len(), "Embedded texts");
        Ok(vectors)
    }
}

/// Cut on a character boundary
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Put vectors back in input order and check nothing is missing
fn order_embeddings(
    mut data: Vec<EmbeddingData>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, RetrievalError> {
    if data.len() != expected {
        return Err(RetrievalError::Embedding(format!(
            "Expected {expected} vectors, got {}",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    if data.iter().enumerate().any(|(i, d)| d.index != i) {
        return Err(RetrievalError::Embedding(
            "Embedding indices do not cover the input".to_string(),
        ));
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
