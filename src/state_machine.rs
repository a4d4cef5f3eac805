//! Core conversation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, Question, ReplyIntent};
pub use event::{Event, Verdict};
pub use state::ConvState;
pub use transition::{transition, TransitionError};
