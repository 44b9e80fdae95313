//! Runtime for answering questions
//!
//! Wires the pure state machines to the external services. Every external
//! call runs under a timeout and can be cancelled between or during states.

mod query_router;
mod rag_engine;

#[cfg(test)]
pub mod testing;

pub use query_router::RouterOutcome;

use query_router::QueryRouter;
use rag_engine::RagEngine;

use crate::error::{FailureKind, Stage, WorkflowError};
use crate::grader::{GraderAdapter, DEFAULT_GRADE_RETRIES};
use crate::llm::LlmService;
use crate::prompts;
use crate::retrieval::Retriever;
use crate::state_machine::{ConversationState, Document, Intent, Message, RagContext, Verdict};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The only failure text a user ever sees
pub const UNAVAILABLE_MESSAGE: &str = "Unable to answer right now, please retry.";

/// Default bound on a single external call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-call knobs shared by both executors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallSettings {
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            temperature: 0.0,
            max_tokens: prompts::ANSWER_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkflowSettings {
    pub rag: RagContext,
    pub grade_retries: u32,
    pub calls: CallSettings,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            rag: RagContext::default(),
            grade_retries: DEFAULT_GRADE_RETRIES,
            calls: CallSettings::default(),
        }
    }
}

/// User-facing result of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum FinalResponse {
    Answer {
        text: String,
        intent: Option<Intent>,
        verdict: Verdict,
        documents: Vec<Document>,
    },
    Unavailable {
        message: String,
        kind: FailureKind,
    },
}

impl FinalResponse {
    fn unavailable(kind: FailureKind) -> Self {
        FinalResponse::Unavailable {
            message: UNAVAILABLE_MESSAGE.to_string(),
            kind,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            FinalResponse::Answer { text, .. } => text,
            FinalResponse::Unavailable { message, .. } => message,
        }
    }
}

/// Question answering over a conversation's documents.
///
/// Holds no per-invocation state, so one instance can serve many
/// concurrent invocations.
pub struct Workflow {
    router: QueryRouter,
}

impl Workflow {
    pub fn new(
        llm: Arc<dyn LlmService>,
        retriever: Arc<Retriever>,
        settings: WorkflowSettings,
    ) -> Self {
        let grader = Arc::new(GraderAdapter::new(llm.clone(), settings.grade_retries));
        let rag = RagEngine::new(
            llm.clone(),
            retriever,
            grader,
            settings.rag,
            settings.calls,
        );
        Self {
            router: QueryRouter::new(llm, rag, settings.calls),
        }
    }

    /// Run one invocation, surfacing the typed failure
    pub async fn run(
        &self,
        question: &str,
        conversation_id: &str,
        history: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<RouterOutcome, WorkflowError> {
        let conversation = ConversationState::new(question, conversation_id, history);
        self.router.run(conversation, cancel).await
    }

    /// Run one invocation and convert any failure into the single
    /// retry message
    pub async fn answer_question(
        &self,
        question: &str,
        conversation_id: &str,
        history: Vec<Message>,
        cancel: &CancellationToken,
    ) -> FinalResponse {
        match self.run(question, conversation_id, history, cancel).await {
            Ok(outcome) => FinalResponse::Answer {
                text: outcome.answer,
                intent: outcome.intent,
                verdict: outcome.verdict,
                documents: outcome.documents,
            },
            Err(e) => {
                let kind = e.kind();
                if kind == FailureKind::Cancelled {
                    tracing::info!(conv_id = %conversation_id, "Invocation cancelled");
                } else {
                    tracing::error!(
                        conv_id = %conversation_id,
                        kind = kind.as_str(),
                        error = %e,
                        "Invocation failed"
                    );
                }
                FinalResponse::unavailable(kind)
            }
        }
    }
}

/// Bound an external call by `timeout` and race it against `cancel`.
/// Losing the race drops the in-flight future.
pub(crate) async fn run_stage<T, F>(
    stage: Stage,
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, WorkflowError>
where
    F: Future<Output = Result<T, WorkflowError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::info!(stage = stage.as_str(), "Stage cancelled");
            Err(WorkflowError::Cancelled)
        }
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(inner) => inner,
            Err(_) => {
                tracing::warn!(stage = stage.as_str(), timeout_ms = %timeout.as_millis(), "Stage timed out");
                Err(WorkflowError::TimedOut { stage })
            }
        },
    }
}
