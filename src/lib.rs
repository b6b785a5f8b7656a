//! LLM-driven finite state machines
//!
//! Each state describes one conversational step: how to prompt the model,
//! which tools it may call, how to fold the reply into the conversation
//! context and how to pick the next state. The runtime drives a conversation
//! through those states one user input at a time. The `salon` module is a
//! complete receptionist built on top of it.

#![allow(clippy::missing_errors_doc)] // accessors and setters return `FsmResult`; variants are documented on `FsmError`
#![allow(clippy::must_use_candidate)] // plain getters; builder methods carry `#[must_use]`

pub mod llm;
pub mod runtime;
pub mod salon;
pub mod state_machine;
