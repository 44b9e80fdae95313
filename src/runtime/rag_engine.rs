//! Executor for the retrieval cycle
//!
//! Feeds events into the pure transition function, performs the effect it
//! asks for, and turns the outcome into the next event. Runs in a loop, not
//! by recursion.

use super::{run_stage, CallSettings};
use crate::error::{Stage, WorkflowError};
use crate::grader::GraderAdapter;
use crate::llm::{LlmError, LlmMessage, LlmRequest, LlmService, RequestPurpose};
use crate::prompts;
use crate::retrieval::Retriever;
use crate::state_machine::rag;
use crate::state_machine::state::format_documents;
use crate::state_machine::{
    ConversationState, Document, Message, RagContext, RagEffect, RagEvent, RagState,
    TransitionError, Verdict,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What the retrieval cycle hands back to the router
#[derive(Debug, Clone, PartialEq)]
pub struct RagOutcome {
    pub answer: String,
    /// Documents that survived the last relevance filter
    pub documents: Vec<Document>,
    /// The full log, including every generated answer
    pub messages: Vec<Message>,
    pub verdict: Verdict,
    pub cycles: u32,
}

pub struct RagEngine {
    llm: Arc<dyn LlmService>,
    retriever: Arc<Retriever>,
    grader: Arc<GraderAdapter>,
    context: RagContext,
    calls: CallSettings,
}

impl RagEngine {
    pub fn new(
        llm: Arc<dyn LlmService>,
        retriever: Arc<Retriever>,
        grader: Arc<GraderAdapter>,
        context: RagContext,
        calls: CallSettings,
    ) -> Self {
        Self {
            llm,
            retriever,
            grader,
            context,
            calls,
        }
    }

    pub async fn run(
        &self,
        conversation: ConversationState,
        cancel: &CancellationToken,
    ) -> Result<RagOutcome, WorkflowError> {
        let conv_id = conversation.conversation_id.clone();
        let mut state = RagState::new(conversation);
        let mut events = vec![RagEvent::Start];
        let mut outcome = None;

        while let Some(event) = events.pop() {
            let event_name = event.name();
            let result = rag::transition(&state, &self.context, event)?;

            tracing::debug!(
                conv_id = %conv_id,
                event = event_name,
                from = state.phase.as_str(),
                to = result.new_state.phase.as_str(),
                cycle = result.new_state.cycles,
                "Retrieval transition"
            );
            if result.new_state.cycles > state.cycles {
                tracing::info!(
                    conv_id = %conv_id,
                    cycle = result.new_state.cycles,
                    max_cycles = self.context.max_cycles,
                    phase = result.new_state.phase.as_str(),
                    "Retrying retrieval cycle"
                );
            }
            state = result.new_state;

            for effect in result.effects {
                match effect {
                    RagEffect::Finish { answer, verdict } => {
                        if verdict == Verdict::Exhausted {
                            tracing::warn!(
                                conv_id = %conv_id,
                                cycles = state.cycles,
                                "Cycle cap reached, returning best available answer"
                            );
                        }
                        outcome = Some(RagOutcome {
                            answer,
                            documents: state.conversation.documents.clone(),
                            messages: state.conversation.messages.clone(),
                            verdict,
                            cycles: state.cycles,
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
                "Retrieval cycle stopped in {} without finishing",
                state.phase.as_str()
            )))
        })
    }

    async fn execute(
        &self,
        effect: RagEffect,
        conv_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RagEvent, WorkflowError> {
        let timeout = self.calls.timeout;
        match effect {
            RagEffect::Retrieve {
                question,
                conversation_id,
            } => {
                let documents = run_stage(Stage::Retrieve, timeout, cancel, async {
                    self.retriever
                        .retrieve(&question, &conversation_id)
                        .await
                        .map_err(WorkflowError::from)
                })
                .await?;
                tracing::info!(conv_id = %conv_id, count = documents.len(), "Retrieved documents");
                Ok(RagEvent::Retrieved { documents })
            }

            RagEffect::GradeDocuments {
                question,
                documents,
            } => {
                let mut grades = Vec::with_capacity(documents.len());
                for document in &documents {
                    let grade = run_stage(Stage::GradeDocuments, timeout, cancel, async {
                        self.grader
                            .grade_document_relevance(&question, &document.text)
                            .await
                            .map_err(|e| WorkflowError::from_llm(Stage::GradeDocuments, e))
                    })
                    .await?;
                    grades.push(grade);
                }
                let kept = grades.iter().filter(|g| g.is_affirmative()).count();
                tracing::info!(
                    conv_id = %conv_id,
                    kept,
                    dropped = grades.len() - kept,
                    "Graded documents"
                );
                Ok(RagEvent::DocumentsGraded { grades })
            }

            RagEffect::Generate {
                question,
                documents,
                messages,
            } => {
                let request = self.generation_request(&question, &documents, &messages);
                let answer = self.complete_text(Stage::Generate, request, cancel).await?;
                if answer.is_empty() {
                    return Err(WorkflowError::from_llm(
                        Stage::Generate,
                        LlmError::unknown("Model returned an empty answer"),
                    ));
                }
                Ok(RagEvent::Generated { answer })
            }

            RagEffect::GradeGroundedness { documents, answer } => {
                let grade = run_stage(Stage::GradeGroundedness, timeout, cancel, async {
                    self.grader
                        .grade_groundedness(&documents, &answer)
                        .await
                        .map_err(|e| WorkflowError::from_llm(Stage::GradeGroundedness, e))
                })
                .await?;
                tracing::info!(conv_id = %conv_id, ?grade, "Graded groundedness");
                Ok(RagEvent::GroundednessGraded { grade })
            }

            RagEffect::GradeAnswerRelevance { question, answer } => {
                let grade = run_stage(Stage::GradeAnswerRelevance, timeout, cancel, async {
                    self.grader
                        .grade_answer_relevance(&question, &answer)
                        .await
                        .map_err(|e| WorkflowError::from_llm(Stage::GradeAnswerRelevance, e))
                })
                .await?;
                tracing::info!(conv_id = %conv_id, ?grade, "Graded answer relevance");
                Ok(RagEvent::AnswerRelevanceGraded { grade })
            }

            RagEffect::TransformQuery { question } => {
                let request = LlmRequest::prompt(
                    RequestPurpose::RewriteQuestion,
                    prompts::rewrite_question(&question),
                )
                .with_system(prompts::REWRITE_SYSTEM)
                .with_temperature(self.calls.temperature)
                .with_max_tokens(self.calls.max_tokens);
                let rewritten = self
                    .complete_text(Stage::TransformQuery, request, cancel)
                    .await?;

                let question = if rewritten.is_empty() {
                    tracing::warn!(conv_id = %conv_id, "Empty rewrite, keeping question");
                    question
                } else {
                    tracing::info!(conv_id = %conv_id, rewritten = %rewritten, "Rewrote question");
                    rewritten
                };
                Ok(RagEvent::QueryTransformed { question })
            }

            RagEffect::Finish { .. } => Err(WorkflowError::Transition(
                TransitionError::InvalidTransition("Finish is not executable".to_string()),
            )),
        }
    }

    /// Prior log, then the context-stuffed prompt as the final user turn
    fn generation_request(
        &self,
        question: &str,
        documents: &[Document],
        messages: &[Message],
    ) -> LlmRequest {
        let mut turns: Vec<LlmMessage> = messages.iter().map(Message::to_llm).collect();
        turns.push(LlmMessage::user(prompts::generate_answer(
            question,
            &format_documents(documents),
        )));
        LlmRequest::new(RequestPurpose::GenerateAnswer, turns)
            .with_temperature(self.calls.temperature)
            .with_max_tokens(self.calls.max_tokens)
    }

    async fn complete_text(
        &self,
        stage: Stage,
        request: LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<String, WorkflowError> {
        run_stage(stage, self.calls.timeout, cancel, async {
            self.llm
                .complete(&request)
                .await
                .map(|response| response.text.trim().to_string())
                .map_err(|e| WorkflowError::from_llm(stage, e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::retrieval::RetrievalSettings;
    use crate::runtime::testing::{MockEmbeddings, MockLlm, MockReranker, MockVectorStore};
    use crate::state_machine::NO_ANSWER_FALLBACK;

    const YES: &str = r#"{"binary_score":"yes"}"#;
    const NO: &str = r#"{"binary_score":"no"}"#;

    fn engine(llm: Arc<MockLlm>, store: MockVectorStore) -> RagEngine {
        let retriever = Arc::new(crate::retrieval::Retriever::new(
            Arc::new(MockEmbeddings::new()),
            Arc::new(store),
            Arc::new(MockReranker::failing()),
            RetrievalSettings::default(),
        ));
        let grader = Arc::new(GraderAdapter::new(llm.clone(), 0));
        RagEngine::new(
            llm,
            retriever,
            grader,
            RagContext::default(),
            CallSettings::default(),
        )
    }

    fn three_docs() -> MockVectorStore {
        MockVectorStore::new()
            .with_document("c1", "Retries default to three.", 0.9)
            .with_document("c1", "Set max_retries to change it.", 0.8)
            .with_document("c1", "Backoff doubles each time.", 0.7)
    }

    fn conversation() -> ConversationState {
        ConversationState::new(
            "How many retries?",
            "c1",
            vec![Message::user("How many retries?")],
        )
    }

    #[tokio::test]
    async fn test_all_relevant_grounded_answer_is_useful() {
        let llm = Arc::new(
            MockLlm::new()
                .on(RequestPurpose::GradeDocument, YES)
                .on(RequestPurpose::GenerateAnswer, "Three, configurable via max_retries.")
                .on(RequestPurpose::GradeGroundedness, YES)
                .on(RequestPurpose::GradeAnswer, YES),
        );
        let outcome = engine(llm.clone(), three_docs())
            .run(conversation(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Useful);
        assert_eq!(outcome.answer, "Three, configurable via max_retries.");
        assert_eq!(outcome.documents.len(), 3);
        assert_eq!(outcome.cycles, 0);
        assert_eq!(llm.call_count(RequestPurpose::GenerateAnswer), 1);
        assert_eq!(llm.call_count(RequestPurpose::GradeDocument), 3);
        assert_eq!(
            outcome.messages.last(),
            Some(&Message::assistant("Three, configurable via max_retries."))
        );
    }

    #[tokio::test]
    async fn test_generation_prompt_includes_history_and_context() {
        let llm = Arc::new(
            MockLlm::new()
                .on(RequestPurpose::GradeDocument, YES)
                .on(RequestPurpose::GenerateAnswer, "answer")
                .on(RequestPurpose::GradeGroundedness, YES)
                .on(RequestPurpose::GradeAnswer, YES),
        );
        engine(llm.clone(), three_docs())
            .run(conversation(), &CancellationToken::new())
            .await
            .unwrap();

        let request = llm
            .recorded_requests()
            .into_iter()
            .find(|r| r.purpose == RequestPurpose::GenerateAnswer)
            .unwrap();
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[1]
            .content
            .contains("Retries default to three.\n\nSet max_retries to change it."));
    }

    #[tokio::test]
    async fn test_no_documents_rewrites_before_generating() {
        let llm = Arc::new(
            MockLlm::new()
                .on(RequestPurpose::RewriteQuestion, "retry count configuration")
                .on(RequestPurpose::GradeDocument, YES),
        );
        let store = MockVectorStore::new();
        let engine = engine(llm.clone(), store);
        let outcome = engine
            .run(conversation(), &CancellationToken::new())
            .await
            .unwrap();

        // Nothing ever retrieved: every cycle rewrites, then the cap hits
        assert_eq!(outcome.verdict, Verdict::Exhausted);
        assert_eq!(outcome.answer, NO_ANSWER_FALLBACK);
        assert_eq!(llm.call_count(RequestPurpose::GenerateAnswer), 0);
        assert_eq!(
            llm.call_count(RequestPurpose::RewriteQuestion),
            RagContext::default().max_cycles as usize
        );
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_generated_answer() {
        let llm = Arc::new(
            MockLlm::new()
                .on(RequestPurpose::GradeDocument, YES)
                .on(RequestPurpose::GenerateAnswer, "unsupported claim")
                .on(RequestPurpose::GradeGroundedness, NO),
        );
        let outcome = engine(llm.clone(), three_docs())
            .run(conversation(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Exhausted);
        assert_eq!(outcome.answer, "unsupported claim");
        assert_eq!(outcome.cycles, RagContext::default().max_cycles);
        assert_eq!(
            llm.call_count(RequestPurpose::GenerateAnswer),
            RagContext::default().max_cycles as usize + 1
        );
    }

    #[tokio::test]
    async fn test_grading_failure_is_classification_failure() {
        let llm = Arc::new(
            MockLlm::new().fail(RequestPurpose::GradeDocument, LlmError::server_error("down")),
        );
        let err = engine(llm, three_docs())
            .run(conversation(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ClassificationFailure);
    }

    #[tokio::test]
    async fn test_generation_failure_is_generation_failure() {
        let llm = Arc::new(
            MockLlm::new()
                .on(RequestPurpose::GradeDocument, YES)
                .fail(RequestPurpose::GenerateAnswer, LlmError::auth("bad key")),
        );
        let err = engine(llm, three_docs())
            .run(conversation(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::GenerationFailure);
    }

    #[tokio::test]
    async fn test_blank_answer_is_generation_failure() {
        let llm = Arc::new(
            MockLlm::new()
                .on(RequestPurpose::GradeDocument, YES)
                .on(RequestPurpose::GenerateAnswer, "  \n\t"),
        );
        let err = engine(llm.clone(), three_docs())
            .run(conversation(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::GenerationFailure);
        assert_eq!(llm.call_count(RequestPurpose::GenerateAnswer), 1);
        assert_eq!(llm.call_count(RequestPurpose::GradeGroundedness), 0);
    }

    #[tokio::test]
    async fn test_retrieval_failure_propagates() {
        let llm = Arc::new(MockLlm::new());
        let err = engine(llm, MockVectorStore::failing())
            .run(conversation(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::RetrievalFailure);
    }
}
