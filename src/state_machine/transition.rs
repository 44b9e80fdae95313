//! Shared transition plumbing
//!
//! Transitions are pure: given the same state, context and event they
//! always produce the same new state and effects, with no I/O.

use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult<S, F> {
    pub new_state: S,
    pub effects: Vec<F>,
}

impl<S, F> TransitionResult<S, F> {
    pub fn new(state: S) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: F) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Expected {expected} document grades, got {got}")]
    GradeCountMismatch { expected: usize, got: usize },
    #[error("No answer available in phase {0}")]
    MissingAnswer(&'static str),
    #[error("Message log was rewritten instead of extended")]
    MessageLogRewritten,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}
