//! Runtime for executing conversations
//!
//! One `StateMachine` per conversation. Machines share a read-only registry
//! and a gateway; everything else they own.

mod executor;

#[cfg(test)]
pub mod testing;

pub use crate::state_machine::MachineDefaults;
pub use executor::{
    CompletionHook, MachineConfig, RunOptions, RunResult, StateMachine, DEFAULT_TERMINAL_STATE,
};
