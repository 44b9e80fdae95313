//! LLM provider abstraction
//!
//! Provides a common interface for chat completion and structured
//! (constrained) completion against an inference service.

mod error;
mod openai;
mod types;

pub use error::{retry_delay, LlmError};
pub use openai::OpenAIService;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Issue a constrained request and pull the schema field out of the reply.
///
/// Only transport or service failures are errors. A reply that is not JSON,
/// or lacks the field, yields an empty [`StructuredOutput`].
pub async fn complete_structured(
    llm: &dyn LlmService,
    request: LlmRequest,
    schema: ResponseSchema,
) -> Result<StructuredOutput, LlmError> {
    let field = schema.field();
    let request = request.with_schema(schema);
    let response = llm.complete(&request).await?;
    let output = StructuredOutput::parse(&response.text, field);
    if output.value.is_none() {
        tracing::debug!(
            purpose = request.purpose.as_str(),
            field,
            "Structured reply missing field"
        );
    }
    Ok(output)
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    purpose = request.purpose.as_str(),
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    purpose = request.purpose.as_str(),
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Bounds the number of in-flight requests shared by every invocation
/// using this service.
pub struct LimitedService {
    inner: Arc<dyn LlmService>,
    permits: Arc<Semaphore>,
}

impl LimitedService {
    pub fn new(inner: Arc<dyn LlmService>, max_in_flight: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }
}

#[async_trait]
impl LlmService for LimitedService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::unknown("LLM request limiter closed"))?;
        self.inner.complete(request).await
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
