//! Workflow state machines
//!
//! Implements the Elm Architecture pattern with pure state transitions.
//! Two machines: the intent router on the outside and the retrieval cycle
//! it delegates to.

pub mod effect;
pub mod event;
pub mod rag;
pub mod router;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{RagEffect, RouterEffect};
pub use event::{RagEvent, RouterEvent};
pub use state::{
    ConversationState, Document, GradeResult, Intent, Message, RagContext, RagState, RouterState,
    Verdict, NO_ANSWER_FALLBACK,
};
pub use transition::TransitionError;
