//! Executor for the intent router

use super::rag_engine::RagEngine;
use super::{run_stage, CallSettings};
use crate::error::{Stage, WorkflowError};
use crate::llm::{
    complete_structured, LlmMessage, LlmRequest, LlmService, RequestPurpose, ResponseSchema,
};
use crate::prompts;
use crate::state_machine::router;
use crate::state_machine::{
    ConversationState, Document, Intent, Message, RouterEffect, RouterEvent, RouterState,
    TransitionError, Verdict,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Structured field the classifier reply is forced into
pub const INTENT_FIELD: &str = "intent";

const INTENT_SCHEMA: ResponseSchema = ResponseSchema::Choice {
    field: INTENT_FIELD,
    options: Intent::TOKENS,
};

/// Result of one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RouterOutcome {
    pub answer: String,
    pub intent: Option<Intent>,
    pub verdict: Verdict,
    pub documents: Vec<Document>,
    pub messages: Vec<Message>,
}

pub struct QueryRouter {
    llm: Arc<dyn LlmService>,
    rag: RagEngine,
    calls: CallSettings,
}

impl QueryRouter {
    pub fn new(llm: Arc<dyn LlmService>, rag: RagEngine, calls: CallSettings) -> Self {
        Self { llm, rag, calls }
    }

    pub async fn run(
        &self,
        conversation: ConversationState,
        cancel: &CancellationToken,
    ) -> Result<RouterOutcome, WorkflowError> {
        let conv_id = conversation.conversation_id.clone();
        let mut state = RouterState::new(conversation);
        let mut events = vec![RouterEvent::Start];
        let mut outcome = None;

        while let Some(event) = events.pop() {
            let event_name = event.name();
            let result = router::transition(&state, event)?;
            tracing::debug!(
                conv_id = %conv_id,
                event = event_name,
                from = state.phase.as_str(),
                to = result.new_state.phase.as_str(),
                "Router transition"
            );
            state = result.new_state;

            for effect in result.effects {
                match effect {
                    RouterEffect::Finish { answer, verdict } => {
                        outcome = Some(RouterOutcome {
                            answer,
                            intent: state.conversation.intent,
                            verdict,
                            documents: state.conversation.documents.clone(),
                            messages: state.conversation.messages.clone(),
                        });
                    }
                    other => {
                        tracing::debug!(conv_id = %conv_id, effect = other.name(), "Executing effect");
                        events.push(self.execute(other, &conv_id, cancel).await?);
                    }
                }
            }
        }

        outcome.ok_or_else(|| {
            WorkflowError::Transition(TransitionError::InvalidTransition(format!(
                "Router stopped in {} without finishing",
                state.phase.as_str()
            )))
        })
    }

    async fn execute(
        &self,
        effect: RouterEffect,
        conv_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RouterEvent, WorkflowError> {
        match effect {
            RouterEffect::ClassifyIntent { question } => {
                let request = LlmRequest::prompt(
                    RequestPurpose::ClassifyIntent,
                    prompts::classify_intent(&question),
                )
                .with_max_tokens(prompts::CLASSIFY_MAX_TOKENS);

                let output = run_stage(Stage::ClassifyIntent, self.calls.timeout, cancel, async {
                    complete_structured(self.llm.as_ref(), request, INTENT_SCHEMA)
                        .await
                        .map_err(|e| WorkflowError::from_llm(Stage::ClassifyIntent, e))
                })
                .await?;

                let intent = output.as_deref().and_then(Intent::from_classifier);
                match intent {
                    Some(intent) => {
                        tracing::info!(conv_id = %conv_id, intent = intent.as_str(), "Classified intent");
                    }
                    None => {
                        tracing::warn!(
                            conv_id = %conv_id,
                            raw = ?output.value,
                            "Unrecognized intent, answering via retrieval"
                        );
                    }
                }
                Ok(RouterEvent::IntentClassified { intent })
            }

            RouterEffect::RunRag {
                question,
                conversation_id,
                messages,
            } => {
                let outcome = self
                    .rag
                    .run(
                        ConversationState::new(question, conversation_id, messages),
                        cancel,
                    )
                    .await?;
                tracing::info!(
                    conv_id = %conv_id,
                    verdict = ?outcome.verdict,
                    cycles = outcome.cycles,
                    documents = outcome.documents.len(),
                    "Retrieval cycle finished"
                );
                Ok(RouterEvent::RagCompleted {
                    answer: outcome.answer,
                    documents: outcome.documents,
                    messages: outcome.messages,
                    verdict: outcome.verdict,
                })
            }

            RouterEffect::AskClarification { question, messages } => {
                let mut turns: Vec<LlmMessage> = messages.iter().map(Message::to_llm).collect();
                turns.push(LlmMessage::user(prompts::ask_clarification(&question)));
                let request = LlmRequest::new(RequestPurpose::AskClarification, turns)
                    .with_temperature(self.calls.temperature)
                    .with_max_tokens(self.calls.max_tokens);

                let answer = run_stage(Stage::AskClarification, self.calls.timeout, cancel, async {
                    self.llm
                        .complete(&request)
                        .await
                        .map(|response| response.text.trim().to_string())
                        .map_err(|e| WorkflowError::from_llm(Stage::AskClarification, e))
                })
                .await?;

                let answer = if answer.is_empty() {
                    tracing::warn!(conv_id = %conv_id, "Empty clarification, using fallback");
                    prompts::CLARIFICATION_FALLBACK.to_string()
                } else {
                    answer
                };
                tracing::info!(conv_id = %conv_id, "Asked for clarification");
                Ok(RouterEvent::ClarificationGenerated { answer })
            }

            RouterEffect::RecordMemory => Ok(RouterEvent::MemoryRecorded),

            RouterEffect::Finish { .. } => Err(WorkflowError::Transition(
                TransitionError::InvalidTransition("Finish is not executable".to_string()),
            )),
        }
    }
}
