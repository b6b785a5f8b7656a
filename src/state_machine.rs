//! Core conversation state machine
//!
//! Each state is a declarative descriptor of one turn: prompt templates, tool
//! declarations, a response contract and a transition selector. A turn renders
//! the prompt from the conversation context, calls the completion gateway,
//! folds the answer and tool calls back into a staged copy of the context and
//! asks the selector where to go next.

pub mod computed;
pub mod context;
mod error;
mod extract;
pub mod prompt;
mod registry;
pub mod state;
pub mod template;
pub mod transition;
mod turn;

#[cfg(test)]
mod proptests;

pub use computed::{ComputedFn, ComputedValues};
pub use context::{Context, ContextView, CHAT_HISTORY_KEY, LAST_TOOL_CALLS_KEY, USER_INPUT_KEY};
pub use error::{FsmError, FsmResult, RenderError};
pub use prompt::{GoalPrompt, HistoryEntry, HistoryRole};
pub use registry::StateRegistry;
pub use state::{OutputPolicy, StateBuilder, StateDescriptor, DEFAULT_OUTPUT_VAR};
pub use template::Template;
pub use transition::{
    resolve_next_state, AllowedTransitions, ConditionalSelector, Transition, TransitionRecord,
};
pub use turn::{execute_turn, MachineDefaults, TurnOutcome};
