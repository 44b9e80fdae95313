//! Common types for LLM interactions

use serde::{Deserialize, Serialize};

/// What a request is for. Carried for logging and so test doubles can
/// answer by purpose instead of by prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPurpose {
    ClassifyIntent,
    AskClarification,
    GenerateAnswer,
    RewriteQuestion,
    GradeDocument,
    GradeGroundedness,
    GradeAnswer,
}

impl RequestPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestPurpose::ClassifyIntent => "classify_intent",
            RequestPurpose::AskClarification => "ask_clarification",
            RequestPurpose::GenerateAnswer => "generate_answer",
            RequestPurpose::RewriteQuestion => "rewrite_question",
            RequestPurpose::GradeDocument => "grade_document",
            RequestPurpose::GradeGroundedness => "grade_groundedness",
            RequestPurpose::GradeAnswer => "grade_answer",
        }
    }
}

/// LLM request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub purpose: RequestPurpose,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Constrains the reply to a JSON object with a closed set of values
    pub schema: Option<ResponseSchema>,
}

impl LlmRequest {
    pub fn new(purpose: RequestPurpose, messages: Vec<LlmMessage>) -> Self {
        Self {
            purpose,
            system: None,
            messages,
            temperature: 0.0,
            max_tokens: None,
            schema: None,
        }
    }

    /// Single user-turn request
    pub fn prompt(purpose: RequestPurpose, text: impl Into<String>) -> Self {
        Self::new(purpose, vec![LlmMessage::user(text)])
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Structured-output constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSchema {
    /// A single string field restricted to one of `options`
    Choice {
        field: &'static str,
        options: &'static [&'static str],
    },
}

impl ResponseSchema {
    pub fn field(&self) -> &'static str {
        match self {
            ResponseSchema::Choice { field, .. } => *field,
        }
    }

    /// JSON schema sent to providers that support constrained decoding
    pub fn to_json_schema(&self) -> serde_json::Value {
        match self {
            ResponseSchema::Choice { field, options } => serde_json::json!({
                "type": "object",
                "properties": {
                    (*field): { "type": "string", "enum": options }
                },
                "required": [field],
                "additionalProperties": false
            }),
        }
    }
}

/// Message in conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    #[cfg(test)]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Usage,
}

impl LlmResponse {
    #[cfg(test)]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: Usage::default(),
        }
    }
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Value pulled out of a structured reply. `None` when the reply was not
/// JSON or did not carry the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredOutput {
    pub value: Option<String>,
}

impl StructuredOutput {
    /// Extract `field` from a reply. Tolerates a fenced code block around
    /// the JSON object since some providers ignore `response_format`.
    pub fn parse(text: &str, field: &str) -> Self {
        let trimmed = text.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim();

        let value = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|json| json.get(field).and_then(|v| v.as_str()).map(String::from));

        Self { value }
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.value.as_deref()
    }
}
