//! Workflow-level errors
//!
//! Every failure that aborts an invocation ends up here, tagged with the
//! stage it came from so logs keep the classification / retrieval /
//! generation distinction.

use crate::llm::LlmError;
use crate::retrieval::RetrievalError;
use crate::state_machine::TransitionError;
use thiserror::Error;

/// External call a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ClassifyIntent,
    AskClarification,
    Retrieve,
    GradeDocuments,
    Generate,
    GradeGroundedness,
    GradeAnswerRelevance,
    TransformQuery,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ClassifyIntent => "classify_intent",
            Stage::AskClarification => "ask_clarification",
            Stage::Retrieve => "retrieve",
            Stage::GradeDocuments => "grade_documents",
            Stage::Generate => "generate",
            Stage::GradeGroundedness => "grade_groundedness",
            Stage::GradeAnswerRelevance => "grade_answer_relevance",
            Stage::TransformQuery => "transform_query",
        }
    }

    pub fn failure_kind(self) -> FailureKind {
        match self {
            Stage::ClassifyIntent
            | Stage::GradeDocuments
            | Stage::GradeGroundedness
            | Stage::GradeAnswerRelevance => FailureKind::ClassificationFailure,
            Stage::Retrieve => FailureKind::RetrievalFailure,
            Stage::Generate | Stage::AskClarification | Stage::TransformQuery => {
                FailureKind::GenerationFailure
            }
        }
    }
}

/// Coarse failure classes used for logging and the final response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Intent or grading call failed (service unavailable)
    ClassificationFailure,
    /// Embedding or vector search failed
    RetrievalFailure,
    /// Answer, clarification, or rewrite call failed
    GenerationFailure,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ClassificationFailure => "classification_failure",
            FailureKind::RetrievalFailure => "retrieval_failure",
            FailureKind::GenerationFailure => "generation_failure",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Classification failed during {}: {source}", stage.as_str())]
    Classification {
        stage: Stage,
        #[source]
        source: LlmError,
    },
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("Generation failed during {}: {source}", stage.as_str())]
    Generation {
        stage: Stage,
        #[source]
        source: LlmError,
    },
    #[error("Timed out during {}", stage.as_str())]
    TimedOut { stage: Stage },
    #[error("Cancelled")]
    Cancelled,
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl WorkflowError {
    /// Attribute a language-model failure to the stage that issued it
    pub fn from_llm(stage: Stage, source: LlmError) -> Self {
        match stage.failure_kind() {
            FailureKind::ClassificationFailure => WorkflowError::Classification { stage, source },
            _ => WorkflowError::Generation { stage, source },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            WorkflowError::Classification { .. } => FailureKind::ClassificationFailure,
            WorkflowError::Retrieval(_) => FailureKind::RetrievalFailure,
            WorkflowError::Generation { .. } => FailureKind::GenerationFailure,
            WorkflowError::TimedOut { stage } => stage.failure_kind(),
            WorkflowError::Cancelled => FailureKind::Cancelled,
            WorkflowError::Transition(_) => FailureKind::Internal,
        }
    }
}
