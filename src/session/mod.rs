//! Conversation session: state machine plus the task that drives it

mod runtime;
pub mod state;

pub use runtime::{
    Command, SessionError, SessionEvent, SessionHandle, SessionRuntime, SessionServices,
    SessionSettings,
};
pub use state::{
    ConversationState, DIARY_CLOSING, DIARY_SEED, Effect, FailureSource, Phase, Rejection,
    SessionSnapshot,
};
