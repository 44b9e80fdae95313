//! Effects produced by state transitions

use super::state::{Document, Message, Verdict};

/// External calls requested by the retrieval cycle
#[derive(Debug, Clone, PartialEq)]
pub enum RagEffect {
    Retrieve {
        question: String,
        conversation_id: String,
    },
    GradeDocuments {
        question: String,
        documents: Vec<Document>,
    },
    Generate {
        question: String,
        documents: Vec<Document>,
        messages: Vec<Message>,
    },
    GradeGroundedness {
        documents: Vec<Document>,
        answer: String,
    },
    GradeAnswerRelevance {
        question: String,
        answer: String,
    },
    TransformQuery {
        question: String,
    },
    /// Terminal: hand the answer back to the caller
    Finish { answer: String, verdict: Verdict },
}

/// External calls requested by the intent router
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEffect {
    ClassifyIntent {
        question: String,
    },
    RunRag {
        question: String,
        conversation_id: String,
        messages: Vec<Message>,
    },
    AskClarification {
        question: String,
        messages: Vec<Message>,
    },
    RecordMemory,
    /// Terminal: the invocation's final answer
    Finish { answer: String, verdict: Verdict },
}

impl RagEffect {
    pub fn name(&self) -> &'static str {
        match self {
            RagEffect::Retrieve { .. } => "retrieve",
            RagEffect::GradeDocuments { .. } => "grade_documents",
            RagEffect::Generate { .. } => "generate",
            RagEffect::GradeGroundedness { .. } => "grade_groundedness",
            RagEffect::GradeAnswerRelevance { .. } => "grade_answer_relevance",
            RagEffect::TransformQuery { .. } => "transform_query",
            RagEffect::Finish { .. } => "finish",
        }
    }
}

impl RouterEffect {
    pub fn name(&self) -> &'static str {
        match self {
            RouterEffect::ClassifyIntent { .. } => "classify_intent",
            RouterEffect::RunRag { .. } => "run_rag",
            RouterEffect::AskClarification { .. } => "ask_clarification",
            RouterEffect::RecordMemory => "record_memory",
            RouterEffect::Finish { .. } => "finish",
        }
    }
}
