//! Binary classifiers over the language model: document relevance,
//! answer groundedness, and answer relevance.
//!
//! Each grade is a structured call forced into a `binary_score` field.
//! Only the exact token `yes` is affirmative. Malformed or missing output
//! grades negative; only service failures are errors.

use crate::llm::{
    complete_structured, retry_delay, LlmError, LlmRequest, LlmService, RequestPurpose,
    ResponseSchema,
};
use crate::prompts;
use crate::state_machine::state::format_documents;
use crate::state_machine::{Document, GradeResult};
use std::sync::Arc;

/// Structured field every grader reply is forced into
pub const GRADE_FIELD: &str = "binary_score";

/// Default retries for a transient grading failure
pub const DEFAULT_GRADE_RETRIES: u32 = 1;

const GRADE_SCHEMA: ResponseSchema = ResponseSchema::Choice {
    field: GRADE_FIELD,
    options: GradeResult::TOKENS,
};

pub struct GraderAdapter {
    llm: Arc<dyn LlmService>,
    retries: u32,
}

impl GraderAdapter {
    pub fn new(llm: Arc<dyn LlmService>, retries: u32) -> Self {
        Self { llm, retries }
    }

    pub async fn grade_document_relevance(
        &self,
        question: &str,
        document: &str,
    ) -> Result<GradeResult, LlmError> {
        let request = LlmRequest::prompt(
            RequestPurpose::GradeDocument,
            prompts::grade_document(document, question),
        )
        .with_system(prompts::GRADE_DOCUMENT_SYSTEM);
        self.grade(request).await
    }

    pub async fn grade_groundedness(
        &self,
        documents: &[Document],
        answer: &str,
    ) -> Result<GradeResult, LlmError> {
        let request = LlmRequest::prompt(
            RequestPurpose::GradeGroundedness,
            prompts::grade_groundedness(&format_documents(documents), answer),
        )
        .with_system(prompts::GRADE_GROUNDEDNESS_SYSTEM);
        self.grade(request).await
    }

    pub async fn grade_answer_relevance(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<GradeResult, LlmError> {
        let request = LlmRequest::prompt(
            RequestPurpose::GradeAnswer,
            prompts::grade_answer(question, answer),
        )
        .with_system(prompts::GRADE_ANSWER_SYSTEM);
        self.grade(request).await
    }

    /// Retry transient failures with backoff, then give up
    async fn grade(&self, request: LlmRequest) -> Result<GradeResult, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match complete_structured(self.llm.as_ref(), request.clone(), GRADE_SCHEMA).await {
                Ok(output) => {
                    let grade = GradeResult::from_token(output.as_deref());
                    tracing::debug!(
                        purpose = request.purpose.as_str(),
                        raw = ?output.value,
                        ?grade,
                        "Graded"
                    );
                    return Ok(grade);
                }
                Err(e) if e.kind.is_retryable() && attempt <= self.retries => {
                    let delay = retry_delay(attempt);
                    tracing::warn!(
                        purpose = request.purpose.as_str(),
                        attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Grading call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
