//! Retrieval cycle: retrieve, grade documents, generate, grade generation,
//! and rewrite the question when the answer misses.
//!
//! ```text
//! Ready -> Retrieving -> GradingDocuments -+-> Generating -> GradingGroundedness
//!              ^                           |        ^              |      |
//!              |                       (none kept)  +--(ungrounded)+   (grounded)
//!              |                           v                              v
//!              +------------------ TransformingQuery <--(off-topic)-- GradingAnswerRelevance
//!                                                                         |
//!                                                                    (on-topic) -> Done
//! ```
//!
//! Every loop edge spends one cycle. With the budget spent the machine
//! stops in `Exhausted` and returns whatever answer it has.

use super::effect::RagEffect;
use super::event::RagEvent;
use super::state::{
    Document, GradeResult, RagContext, RagPhase, RagState, StateUpdate, Verdict,
    NO_ANSWER_FALLBACK,
};
use super::transition::{TransitionError, TransitionResult};

pub type RagTransition = TransitionResult<RagState, RagEffect>;

/// The two ways back into the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEdge {
    TransformQuery,
    Regenerate,
}

/// Pure transition function for the retrieval cycle
pub fn transition(
    state: &RagState,
    context: &RagContext,
    event: RagEvent,
) -> Result<RagTransition, TransitionError> {
    match (state.phase, event) {
        (RagPhase::Ready, RagEvent::Start) => Ok(retrieve(state.clone())),

        (RagPhase::Retrieving, RagEvent::Retrieved { documents }) => {
            let mut next = state.clone();
            next.conversation = next
                .conversation
                .merge(StateUpdate::documents(documents.clone()));
            next.phase = RagPhase::GradingDocuments;
            let question = next.conversation.question.clone();
            Ok(RagTransition::new(next).with_effect(RagEffect::GradeDocuments {
                question,
                documents,
            }))
        }

        (RagPhase::GradingDocuments, RagEvent::DocumentsGraded { grades }) => {
            let documents = &state.conversation.documents;
            if grades.len() != documents.len() {
                return Err(TransitionError::GradeCountMismatch {
                    expected: documents.len(),
                    got: grades.len(),
                });
            }

            let kept = filter_relevant(documents, &grades);
            let mut next = state.clone();
            next.conversation = next.conversation.merge(StateUpdate::documents(kept));

            if next.conversation.documents.is_empty() {
                Ok(take_loop_edge(next, context, LoopEdge::TransformQuery))
            } else {
                Ok(generate(next))
            }
        }

        (RagPhase::Generating, RagEvent::Generated { answer }) => {
            let mut next = state.clone();
            next.conversation = next.conversation.merge(StateUpdate::answer(answer.clone()));
            next.phase = RagPhase::GradingGroundedness;
            next.last_groundedness = None;
            next.last_answer_relevance = None;
            let documents = next.conversation.documents.clone();
            Ok(RagTransition::new(next)
                .with_effect(RagEffect::GradeGroundedness { documents, answer }))
        }

        (RagPhase::GradingGroundedness, RagEvent::GroundednessGraded { grade }) => {
            let mut next = state.clone();
            next.last_groundedness = Some(grade);

            if grade.is_affirmative() {
                let Some(answer) = next.conversation.answer.clone() else {
                    return Err(TransitionError::MissingAnswer(state.phase.as_str()));
                };
                next.phase = RagPhase::GradingAnswerRelevance;
                let question = next.conversation.question.clone();
                Ok(RagTransition::new(next)
                    .with_effect(RagEffect::GradeAnswerRelevance { question, answer }))
            } else {
                Ok(take_loop_edge(next, context, LoopEdge::Regenerate))
            }
        }

        (RagPhase::GradingAnswerRelevance, RagEvent::AnswerRelevanceGraded { grade }) => {
            let mut next = state.clone();
            next.last_answer_relevance = Some(grade);

            if grade.is_affirmative() {
                let Some(answer) = next.conversation.answer.clone() else {
                    return Err(TransitionError::MissingAnswer(state.phase.as_str()));
                };
                next.phase = RagPhase::Done;
                Ok(RagTransition::new(next).with_effect(RagEffect::Finish {
                    answer,
                    verdict: Verdict::Useful,
                }))
            } else {
                Ok(take_loop_edge(next, context, LoopEdge::TransformQuery))
            }
        }

        (RagPhase::TransformingQuery, RagEvent::QueryTransformed { question }) => {
            let mut next = state.clone();
            next.conversation = next.conversation.merge(StateUpdate::question(question));
            Ok(retrieve(next))
        }

        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "No retrieval transition from {} on {}",
            phase.as_str(),
            event.name()
        ))),
    }
}

/// Keep affirmative-graded documents, in their original order
pub fn filter_relevant(documents: &[Document], grades: &[GradeResult]) -> Vec<Document> {
    documents
        .iter()
        .zip(grades)
        .filter(|(_, grade)| grade.is_affirmative())
        .map(|(doc, _)| doc.clone())
        .collect()
}

fn retrieve(mut next: RagState) -> RagTransition {
    next.phase = RagPhase::Retrieving;
    let question = next.conversation.question.clone();
    let conversation_id = next.conversation.conversation_id.clone();
    RagTransition::new(next).with_effect(RagEffect::Retrieve {
        question,
        conversation_id,
    })
}

fn generate(mut next: RagState) -> RagTransition {
    next.phase = RagPhase::Generating;
    let effect = RagEffect::Generate {
        question: next.conversation.question.clone(),
        documents: next.conversation.documents.clone(),
        messages: next.conversation.messages.clone(),
    };
    RagTransition::new(next).with_effect(effect)
}

fn take_loop_edge(mut next: RagState, context: &RagContext, edge: LoopEdge) -> RagTransition {
    if next.cycles >= context.max_cycles {
        return exhaust(next);
    }
    next.cycles += 1;

    match edge {
        LoopEdge::TransformQuery => {
            next.phase = RagPhase::TransformingQuery;
            let question = next.conversation.question.clone();
            RagTransition::new(next).with_effect(RagEffect::TransformQuery { question })
        }
        LoopEdge::Regenerate => generate(next),
    }
}

fn exhaust(mut next: RagState) -> RagTransition {
    let answer = if let Some(answer) = next.conversation.answer.clone() {
        answer
    } else {
        next.conversation = next
            .conversation
            .merge(StateUpdate::answer(NO_ANSWER_FALLBACK));
        NO_ANSWER_FALLBACK.to_string()
    };
    next.phase = RagPhase::Exhausted;
    RagTransition::new(next).with_effect(RagEffect::Finish {
        answer,
        verdict: Verdict::Exhausted,
    })
}
