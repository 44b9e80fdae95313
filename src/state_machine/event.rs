//! Events that drive the workflow machines
//!
//! Each event carries the outcome of the effect the previous transition
//! asked for.

use super::state::{Document, GradeResult, Intent, Message, Verdict};

/// Events for the retrieval cycle
#[derive(Debug, Clone, PartialEq)]
pub enum RagEvent {
    Start,
    Retrieved { documents: Vec<Document> },
    /// One grade per document, in the order the documents were graded
    DocumentsGraded { grades: Vec<GradeResult> },
    Generated { answer: String },
    GroundednessGraded { grade: GradeResult },
    AnswerRelevanceGraded { grade: GradeResult },
    QueryTransformed { question: String },
}

/// Events for the intent router
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    Start,
    /// `None` when the classifier output was outside the closed set
    IntentClassified { intent: Option<Intent> },
    RagCompleted {
        answer: String,
        documents: Vec<Document>,
        messages: Vec<Message>,
        verdict: Verdict,
    },
    ClarificationGenerated { answer: String },
    MemoryRecorded,
}

impl RagEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RagEvent::Start => "start",
            RagEvent::Retrieved { .. } => "retrieved",
            RagEvent::DocumentsGraded { .. } => "documents_graded",
            RagEvent::Generated { .. } => "generated",
            RagEvent::GroundednessGraded { .. } => "groundedness_graded",
            RagEvent::AnswerRelevanceGraded { .. } => "answer_relevance_graded",
            RagEvent::QueryTransformed { .. } => "query_transformed",
        }
    }
}

impl RouterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RouterEvent::Start => "start",
            RouterEvent::IntentClassified { .. } => "intent_classified",
            RouterEvent::RagCompleted { .. } => "rag_completed",
            RouterEvent::ClarificationGenerated { .. } => "clarification_generated",
            RouterEvent::MemoryRecorded => "memory_recorded",
        }
    }
}
