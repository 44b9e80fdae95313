//! Workflow state types

use crate::llm::{LlmMessage, MessageRole};
use serde::{Deserialize, Serialize};

// ============================================================================
// Data model
// ============================================================================

/// A retrieved chunk of the conversation's knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source_url: String,
    pub conversation_id: String,
    pub relevance_score: Option<f32>,
}

/// Classified purpose of a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    General,
    Code,
    Clarification,
}

impl Intent {
    pub const TOKENS: &'static [&'static str] = &["general", "code", "clarification"];

    /// Validate classifier output against the closed set. Surrounding
    /// whitespace and case are ignored; anything else is unrecognized.
    pub fn from_classifier(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "general" => Some(Intent::General),
            "code" => Some(Intent::Code),
            "clarification" => Some(Intent::Clarification),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::General => "general",
            Intent::Code => "code",
            Intent::Clarification => "clarification",
        }
    }
}

/// Binary classifier decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeResult {
    Affirmative,
    Negative,
}

impl GradeResult {
    pub const AFFIRMATIVE_TOKEN: &'static str = "yes";
    pub const TOKENS: &'static [&'static str] = &["yes", "no"];

    /// Only the exact affirmative token counts. Missing, malformed, or
    /// differently-cased output is negative.
    pub fn from_token(raw: Option<&str>) -> Self {
        if raw == Some(Self::AFFIRMATIVE_TOKEN) {
            GradeResult::Affirmative
        } else {
            GradeResult::Negative
        }
    }

    pub fn is_affirmative(self) -> bool {
        self == GradeResult::Affirmative
    }
}

/// One entry of the running conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn to_llm(&self) -> LlmMessage {
        LlmMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// State threaded through one question-answering invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub question: String,
    pub conversation_id: String,
    pub documents: Vec<Document>,
    pub intent: Option<Intent>,
    pub answer: Option<String>,
    pub messages: Vec<Message>,
}

impl ConversationState {
    pub fn new(
        question: impl Into<String>,
        conversation_id: impl Into<String>,
        history: Vec<Message>,
    ) -> Self {
        Self {
            question: question.into(),
            conversation_id: conversation_id.into(),
            documents: Vec::new(),
            intent: None,
            answer: None,
            messages: history,
        }
    }

    /// Merge a partial update. Documents are replaced wholesale; messages
    /// are only ever appended.
    #[must_use]
    pub fn merge(mut self, update: StateUpdate) -> Self {
        if let Some(question) = update.question {
            self.question = question;
        }
        if let Some(documents) = update.documents {
            self.documents = documents;
        }
        if let Some(intent) = update.intent {
            self.intent = Some(intent);
        }
        if let Some(answer) = update.answer {
            self.answer = Some(answer);
        }
        self.messages.extend(update.append_messages);
        self
    }
}

pub fn format_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Partial update produced by a transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub question: Option<String>,
    pub documents: Option<Vec<Document>>,
    pub intent: Option<Intent>,
    pub answer: Option<String>,
    pub append_messages: Vec<Message>,
}

impl StateUpdate {
    pub fn question(question: impl Into<String>) -> Self {
        Self {
            question: Some(question.into()),
            ..Default::default()
        }
    }

    pub fn documents(documents: Vec<Document>) -> Self {
        Self {
            documents: Some(documents),
            ..Default::default()
        }
    }

    pub fn intent(intent: Option<Intent>) -> Self {
        Self {
            intent,
            ..Default::default()
        }
    }

    /// Set the answer and append it to the log as an assistant message
    pub fn answer(answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self {
            append_messages: vec![Message::assistant(answer.clone())],
            answer: Some(answer),
            ..Default::default()
        }
    }

    pub fn append(messages: Vec<Message>) -> Self {
        Self {
            append_messages: messages,
            ..Default::default()
        }
    }
}

// ============================================================================
// Inner machine: retrieve / grade / generate / grade / transform
// ============================================================================

/// Phases of the retrieval cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagPhase {
    /// Created, not yet started
    #[default]
    Ready,
    Retrieving,
    GradingDocuments,
    Generating,
    GradingGroundedness,
    GradingAnswerRelevance,
    TransformingQuery,
    /// Grounded and on-topic answer produced
    Done,
    /// Cycle budget spent; best available answer returned
    Exhausted,
}

impl RagPhase {
    #[cfg(test)]
    pub fn is_terminal(self) -> bool {
        matches!(self, RagPhase::Done | RagPhase::Exhausted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RagPhase::Ready => "ready",
            RagPhase::Retrieving => "retrieving",
            RagPhase::GradingDocuments => "grading_documents",
            RagPhase::Generating => "generating",
            RagPhase::GradingGroundedness => "grading_groundedness",
            RagPhase::GradingAnswerRelevance => "grading_answer_relevance",
            RagPhase::TransformingQuery => "transforming_query",
            RagPhase::Done => "done",
            RagPhase::Exhausted => "exhausted",
        }
    }
}

/// How the retrieval cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Both generation grades were affirmative
    Useful,
    /// The cycle cap was reached first
    Exhausted,
    /// Answered without retrieval (clarification path)
    NotRetrieved,
}

/// Inner machine state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RagState {
    pub phase: RagPhase,
    pub conversation: ConversationState,
    /// Loop edges taken so far (query rewrites plus regenerations)
    pub cycles: u32,
    /// Most recent groundedness grade, if any
    pub last_groundedness: Option<GradeResult>,
    /// Most recent answer-relevance grade, if any
    pub last_answer_relevance: Option<GradeResult>,
}

impl RagState {
    pub fn new(conversation: ConversationState) -> Self {
        Self {
            conversation,
            ..Default::default()
        }
    }
}

/// Immutable configuration for the inner machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RagContext {
    pub max_cycles: u32,
}

/// Default number of loop edges before giving up
pub const DEFAULT_MAX_CYCLES: u32 = 3;

impl Default for RagContext {
    fn default() -> Self {
        Self {
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }
}

/// Answer returned when the cap is hit before anything was generated
pub const NO_ANSWER_FALLBACK: &str = "I couldn't find information in this conversation's documents that answers your question. Try rephrasing it or asking about a different part of the documentation.";

// ============================================================================
// Outer machine: classify / route / record
// ============================================================================

/// Phases of the intent router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterPhase {
    #[default]
    Start,
    ClassifyingIntent,
    AnsweringViaRetrieval,
    AskingClarification,
    RecordingMemory,
    Done,
}

impl RouterPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RouterPhase::Start => "start",
            RouterPhase::ClassifyingIntent => "classifying_intent",
            RouterPhase::AnsweringViaRetrieval => "answering_via_retrieval",
            RouterPhase::AskingClarification => "asking_clarification",
            RouterPhase::RecordingMemory => "recording_memory",
            RouterPhase::Done => "done",
        }
    }
}

/// Where a classified intent is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Retrieval,
    Clarification,
}

impl Route {
    /// `clarification` asks the user; everything else, including `code` and
    /// unrecognized output, answers via retrieval.
    pub fn for_intent(intent: Option<Intent>) -> Self {
        match intent {
            Some(Intent::Clarification) => Route::Clarification,
            Some(Intent::General | Intent::Code) | None => Route::Retrieval,
        }
    }
}

/// Outer machine state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterState {
    pub phase: RouterPhase,
    pub conversation: ConversationState,
    pub verdict: Option<Verdict>,
}

impl RouterState {
    pub fn new(conversation: ConversationState) -> Self {
        Self {
            conversation,
            ..Default::default()
        }
    }
}
