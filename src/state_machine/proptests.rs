//! Property-based tests for the workflow machines
//!
//! The machines are driven end to end with randomly scripted outcomes for
//! every external call, and the invariants are checked along the way.

use super::effect::{RagEffect, RouterEffect};
use super::event::{RagEvent, RouterEvent};
use super::rag;
use super::router::{self, record_memory};
use super::state::*;
use super::transition::TransitionError;
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn doc(i: usize) -> Document {
    Document {
        text: format!("chunk {i}"),
        source_url: "https://docs.example.com".to_string(),
        conversation_id: "c1".to_string(),
        relevance_score: None,
    }
}

/// Scripted outcomes, consumed round-robin as effects come in
#[derive(Debug, Clone)]
struct Script {
    retrieved: Vec<usize>,
    document_grades: Vec<bool>,
    generation_grades: Vec<bool>,
}

impl Script {
    fn grade(values: &[bool], cursor: &mut usize) -> GradeResult {
        let value = values.get(*cursor % values.len().max(1)).copied().unwrap_or(false);
        *cursor += 1;
        if value {
            GradeResult::Affirmative
        } else {
            GradeResult::Negative
        }
    }
}

/// Every state visited and every effect emitted during one run
struct Trace {
    states: Vec<RagState>,
    effects: Vec<RagEffect>,
    steps: usize,
}

fn drive_rag(script: &Script, context: &RagContext) -> Trace {
    let mut state = RagState::new(ConversationState::new("q", "c1", vec![Message::user("q")]));
    let mut event = RagEvent::Start;
    let mut trace = Trace {
        states: vec![state.clone()],
        effects: vec![],
        steps: 0,
    };
    let mut retrieval = 0;
    let mut doc_cursor = 0;
    let mut gen_cursor = 0;

    loop {
        trace.steps += 1;
        assert!(trace.steps < 1000, "machine did not terminate");

        let result = rag::transition(&state, context, event).unwrap();
        state = result.new_state;
        trace.states.push(state.clone());
        let effect = result.effects.into_iter().next().unwrap();
        trace.effects.push(effect.clone());

        event = match effect {
            RagEffect::Retrieve { .. } => {
                let count = script
                    .retrieved
                    .get(retrieval % script.retrieved.len().max(1))
                    .copied()
                    .unwrap_or(0);
                retrieval += 1;
                RagEvent::Retrieved {
                    documents: (0..count).map(doc).collect(),
                }
            }
            RagEffect::GradeDocuments { documents, .. } => RagEvent::DocumentsGraded {
                grades: documents
                    .iter()
                    .map(|_| Script::grade(&script.document_grades, &mut doc_cursor))
                    .collect(),
            },
            RagEffect::Generate { .. } => RagEvent::Generated {
                answer: format!("answer {}", trace.steps),
            },
            RagEffect::GradeGroundedness { .. } => RagEvent::GroundednessGraded {
                grade: Script::grade(&script.generation_grades, &mut gen_cursor),
            },
            RagEffect::GradeAnswerRelevance { .. } => RagEvent::AnswerRelevanceGraded {
                grade: Script::grade(&script.generation_grades, &mut gen_cursor),
            },
            RagEffect::TransformQuery { question } => RagEvent::QueryTransformed {
                question: format!("{question}+"),
            },
            RagEffect::Finish { .. } => return trace,
        };
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_script() -> impl Strategy<Value = Script> {
    (
        proptest::collection::vec(0usize..5, 1..4),
        proptest::collection::vec(any::<bool>(), 1..12),
        proptest::collection::vec(any::<bool>(), 1..12),
    )
        .prop_map(|(retrieved, document_grades, generation_grades)| Script {
            retrieved,
            document_grades,
            generation_grades,
        })
}

fn arb_context() -> impl Strategy<Value = RagContext> {
    (0u32..5).prop_map(|max_cycles| RagContext { max_cycles })
}

fn arb_intent() -> impl Strategy<Value = Option<Intent>> {
    prop_oneof![
        Just(None),
        Just(Some(Intent::General)),
        Just(Some(Intent::Code)),
        Just(Some(Intent::Clarification)),
    ]
}

fn arb_message() -> impl Strategy<Value = Message> {
    (any::<bool>(), "[a-z ]{0,12}").prop_map(|(user, text)| {
        if user {
            Message::user(text)
        } else {
            Message::assistant(text)
        }
    })
}

// ============================================================================
// Retrieval cycle
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Every run ends in a terminal phase with exactly one Finish, and loop
    // edges never exceed the cap.
    #[test]
    fn prop_rag_terminates_within_cap(script in arb_script(), context in arb_context()) {
        let trace = drive_rag(&script, &context);
        let last = trace.states.last().unwrap();

        prop_assert!(last.phase.is_terminal());
        prop_assert!(last.cycles <= context.max_cycles);
        let finishes = trace
            .effects
            .iter()
            .filter(|e| matches!(e, RagEffect::Finish { .. }))
            .count();
        prop_assert_eq!(finishes, 1);

        let rewrites = trace
            .effects
            .iter()
            .filter(|e| matches!(e, RagEffect::TransformQuery { .. }))
            .count();
        prop_assert!(rewrites <= context.max_cycles as usize);
    }

    // Done is only reachable with both generation grades affirmative
    #[test]
    fn prop_done_requires_two_affirmative_grades(script in arb_script(), context in arb_context()) {
        let trace = drive_rag(&script, &context);
        for state in &trace.states {
            if state.phase == RagPhase::Done {
                prop_assert_eq!(state.last_groundedness, Some(GradeResult::Affirmative));
                prop_assert_eq!(state.last_answer_relevance, Some(GradeResult::Affirmative));
            }
        }
        match trace.effects.last() {
            Some(RagEffect::Finish { verdict: Verdict::Useful, .. }) => {
                prop_assert_eq!(trace.states.last().unwrap().phase, RagPhase::Done);
            }
            Some(RagEffect::Finish { verdict, .. }) => {
                prop_assert_eq!(*verdict, Verdict::Exhausted);
                prop_assert_eq!(trace.states.last().unwrap().phase, RagPhase::Exhausted);
            }
            other => prop_assert!(false, "run ended without Finish: {:?}", other),
        }
    }

    // The message log is append-only across the whole run
    #[test]
    fn prop_messages_only_grow(script in arb_script(), context in arb_context()) {
        let trace = drive_rag(&script, &context);
        for pair in trace.states.windows(2) {
            let before = &pair[0].conversation.messages;
            let after = &pair[1].conversation.messages;
            prop_assert!(after.starts_with(before));
        }
    }

    // Generation always sees a non-empty document set
    #[test]
    fn prop_generate_has_documents(script in arb_script(), context in arb_context()) {
        let trace = drive_rag(&script, &context);
        for effect in &trace.effects {
            if let RagEffect::Generate { documents, .. } = effect {
                prop_assert!(!documents.is_empty());
            }
        }
    }

    // Filtering keeps an ordered subsequence of exactly the affirmative documents
    #[test]
    fn prop_filter_is_ordered_subsequence(grades in proptest::collection::vec(any::<bool>(), 0..10)) {
        let documents: Vec<Document> = (0..grades.len()).map(doc).collect();
        let grades: Vec<GradeResult> = grades
            .iter()
            .map(|&g| if g { GradeResult::Affirmative } else { GradeResult::Negative })
            .collect();

        let kept = rag::filter_relevant(&documents, &grades);
        let expected: Vec<Document> = documents
            .iter()
            .zip(&grades)
            .filter(|(_, g)| g.is_affirmative())
            .map(|(d, _)| d.clone())
            .collect();
        prop_assert_eq!(kept, expected);
    }

    // An empty filtered set never reaches generation directly
    #[test]
    fn prop_empty_filter_never_generates(count in 0usize..6, cycles in 0u32..4) {
        let mut state = RagState::new(ConversationState::new("q", "c1", vec![]));
        state.phase = RagPhase::GradingDocuments;
        state.cycles = cycles;
        state.conversation.documents = (0..count).map(doc).collect();

        let result = rag::transition(
            &state,
            &RagContext::default(),
            RagEvent::DocumentsGraded { grades: vec![GradeResult::Negative; count] },
        )
        .unwrap();

        prop_assert!(result.new_state.conversation.documents.is_empty());
        let rewrites_or_finishes = matches!(
            result.effects.first(),
            Some(RagEffect::TransformQuery { .. } | RagEffect::Finish { .. })
        );
        prop_assert!(rewrites_or_finishes, "expected rewrite or finish, got {:?}", result.effects);
    }

    // Grade lists must line up with the documents they grade
    #[test]
    fn prop_grade_count_must_match(count in 1usize..6, extra in 1usize..3) {
        let mut state = RagState::new(ConversationState::new("q", "c1", vec![]));
        state.phase = RagPhase::GradingDocuments;
        state.conversation.documents = (0..count).map(doc).collect();

        let result = rag::transition(
            &state,
            &RagContext::default(),
            RagEvent::DocumentsGraded { grades: vec![GradeResult::Affirmative; count + extra] },
        );
        prop_assert_eq!(
            result.unwrap_err(),
            TransitionError::GradeCountMismatch { expected: count, got: count + extra }
        );
    }
}

// ============================================================================
// Intent router
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Routing follows the intent; clarification never touches documents
    #[test]
    fn prop_router_routes_by_intent(
        intent in arb_intent(),
        history in proptest::collection::vec(arb_message(), 0..5),
    ) {
        let mut state = RouterState::new(ConversationState::new("q", "c1", history));
        state.conversation.documents = vec![doc(0)];

        let state = router::transition(&state, RouterEvent::Start).unwrap().new_state;
        let result = router::transition(&state, RouterEvent::IntentClassified { intent }).unwrap();

        match Route::for_intent(intent) {
            Route::Clarification => {
                let asks = matches!(result.effects[0], RouterEffect::AskClarification { .. });
                prop_assert!(asks, "expected clarification, got {:?}", result.effects);
                let done = router::transition(
                    &result.new_state,
                    RouterEvent::ClarificationGenerated { answer: "which?".to_string() },
                )
                .unwrap()
                .new_state;
                prop_assert_eq!(&done.conversation.documents, &vec![doc(0)]);
            }
            Route::Retrieval => {
                let runs_rag = matches!(result.effects[0], RouterEffect::RunRag { .. });
                prop_assert!(runs_rag, "expected retrieval, got {:?}", result.effects);
            }
        }
    }

    // Recording memory leaves the answer as the last message and is idempotent
    #[test]
    fn prop_record_memory_idempotent(
        history in proptest::collection::vec(arb_message(), 0..6),
        answer in "[a-z ]{1,12}",
    ) {
        let mut conversation = ConversationState::new("q", "c1", history);
        conversation.answer = Some(answer.clone());

        let once = record_memory(conversation.clone());
        prop_assert!(once.messages.starts_with(&conversation.messages));
        prop_assert_eq!(once.messages.last(), Some(&Message::assistant(answer)));
        prop_assert_eq!(record_memory(once.clone()), once);
    }
}
