//! Intent router: classify the question, answer it through the retrieval
//! cycle or ask for clarification, then record the exchange.

use super::effect::RouterEffect;
use super::event::RouterEvent;
use super::state::{
    ConversationState, Message, Route, RouterPhase, RouterState, StateUpdate, Verdict,
};
use super::transition::{TransitionError, TransitionResult};
use crate::llm::MessageRole;

pub type RouterTransition = TransitionResult<RouterState, RouterEffect>;

/// Pure transition function for the intent router
pub fn transition(
    state: &RouterState,
    event: RouterEvent,
) -> Result<RouterTransition, TransitionError> {
    match (state.phase, event) {
        (RouterPhase::Start, RouterEvent::Start) => {
            let mut next = state.clone();
            let question = next.conversation.question.clone();
            next.conversation = next
                .conversation
                .merge(StateUpdate::append(vec![Message::user(question.clone())]));
            next.phase = RouterPhase::ClassifyingIntent;
            Ok(RouterTransition::new(next).with_effect(RouterEffect::ClassifyIntent { question }))
        }

        (RouterPhase::ClassifyingIntent, RouterEvent::IntentClassified { intent }) => {
            let mut next = state.clone();
            next.conversation = next.conversation.merge(StateUpdate::intent(intent));
            let question = next.conversation.question.clone();
            let messages = next.conversation.messages.clone();

            let effect = match Route::for_intent(intent) {
                Route::Retrieval => {
                    next.phase = RouterPhase::AnsweringViaRetrieval;
                    RouterEffect::RunRag {
                        question,
                        conversation_id: next.conversation.conversation_id.clone(),
                        messages,
                    }
                }
                Route::Clarification => {
                    next.phase = RouterPhase::AskingClarification;
                    RouterEffect::AskClarification { question, messages }
                }
            };
            Ok(RouterTransition::new(next).with_effect(effect))
        }

        (
            RouterPhase::AnsweringViaRetrieval,
            RouterEvent::RagCompleted {
                answer,
                documents,
                messages,
                verdict,
            },
        ) => {
            let known = &state.conversation.messages;
            if !messages.starts_with(known) {
                return Err(TransitionError::MessageLogRewritten);
            }
            let appended = messages[known.len()..].to_vec();

            let mut next = state.clone();
            next.conversation = next.conversation.merge(StateUpdate {
                documents: Some(documents),
                answer: Some(answer),
                append_messages: appended,
                ..Default::default()
            });
            next.verdict = Some(verdict);
            next.phase = RouterPhase::RecordingMemory;
            Ok(RouterTransition::new(next).with_effect(RouterEffect::RecordMemory))
        }

        (RouterPhase::AskingClarification, RouterEvent::ClarificationGenerated { answer }) => {
            let mut next = state.clone();
            next.conversation = next.conversation.merge(StateUpdate::answer(answer));
            next.verdict = Some(Verdict::NotRetrieved);
            next.phase = RouterPhase::RecordingMemory;
            Ok(RouterTransition::new(next).with_effect(RouterEffect::RecordMemory))
        }

        (RouterPhase::RecordingMemory, RouterEvent::MemoryRecorded) => {
            let Some(answer) = state.conversation.answer.clone() else {
                return Err(TransitionError::MissingAnswer(state.phase.as_str()));
            };
            let verdict = state.verdict.unwrap_or(Verdict::NotRetrieved);

            let mut next = state.clone();
            next.conversation = record_memory(next.conversation);
            next.phase = RouterPhase::Done;
            Ok(RouterTransition::new(next).with_effect(RouterEffect::Finish { answer, verdict }))
        }

        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "No router transition from {} on {}",
            phase.as_str(),
            event.name()
        ))),
    }
}

/// Make sure the log ends with the question and its final answer.
/// Nothing is appended when the exchange is already recorded.
pub fn record_memory(conversation: ConversationState) -> ConversationState {
    let Some(answer) = conversation.answer.clone() else {
        return conversation;
    };

    let answered = conversation
        .messages
        .last()
        .is_some_and(|m| m.role == MessageRole::Assistant && m.content == answer);
    if answered {
        return conversation;
    }

    let asked = conversation
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .is_some_and(|m| m.content == conversation.question);

    let mut pending = Vec::with_capacity(2);
    if !asked {
        pending.push(Message::user(conversation.question.clone()));
    }
    pending.push(Message::assistant(answer));
    conversation.merge(StateUpdate::append(pending))
}
