//! Transition selection and validation
//!
//! A state's selector looks at the post-turn context and returns a
//! [`Transition`]. [`resolve_next_state`] turns that decision into the next
//! state key, checking it against the machine's allowed-transition table when
//! one is configured. It is pure; the run loop commits its result.

use super::context::ContextView;
use super::error::{FsmError, FsmResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a selector decided after a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Move to the named state
    To(String),
    /// Remain in the current state and wait for more input
    Stay,
    /// Enter the terminal state
    Terminate,
    /// No explicit choice; the transition table decides
    Undecided,
}

impl Transition {
    pub fn to(state: impl Into<String>) -> Self {
        Transition::To(state.into())
    }
}

pub type SelectorFn = Arc<dyn Fn(&ContextView<'_>) -> FsmResult<Transition> + Send + Sync>;
pub type Predicate = Arc<dyn Fn(&ContextView<'_>) -> bool + Send + Sync>;

/// Ordered `(transition, predicate)` pairs; the first match wins.
#[derive(Clone, Default)]
pub struct ConditionalSelector {
    branches: Vec<(Transition, Predicate)>,
}

impl ConditionalSelector {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn when(
        mut self,
        transition: Transition,
        predicate: impl Fn(&ContextView<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.branches.push((transition, Arc::new(predicate)));
        self
    }

    #[must_use]
    pub fn when_state(
        self,
        state: impl Into<String>,
        predicate: impl Fn(&ContextView<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.when(Transition::To(state.into()), predicate)
    }

    pub fn select(&self, view: &ContextView<'_>) -> Transition {
        self.branches
            .iter()
            .find(|(_, predicate)| predicate(view))
            .map_or(Transition::Undecided, |(transition, _)| transition.clone())
    }

    pub fn into_selector(self) -> SelectorFn {
        Arc::new(move |view| Ok(self.select(view)))
    }
}

impl fmt::Debug for ConditionalSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<&Transition> = self.branches.iter().map(|(t, _)| t).collect();
        f.debug_struct("ConditionalSelector").field("branches", &targets).finish()
    }
}

/// Successors each state may explicitly move to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedTransitions {
    successors: HashMap<String, Vec<String>>,
}

impl AllowedTransitions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn allow<I, S>(mut self, from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.successors.entry(from.into()).or_default();
        for target in to {
            let target = target.into();
            if !entry.contains(&target) {
                entry.push(target);
            }
        }
        self
    }

    pub fn successors(&self, from: &str) -> &[String] {
        self.successors.get(from).map_or(&[], Vec::as_slice)
    }

    pub fn permits(&self, from: &str, to: &str) -> bool {
        self.successors(from).iter().any(|s| s == to)
    }
}

/// One committed move, kept for diagnostics only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
}

/// Turn a selector's decision into the next state key.
pub fn resolve_next_state(
    table: Option<&AllowedTransitions>,
    from: &str,
    decision: Transition,
    terminal: &str,
) -> FsmResult<String> {
    match decision {
        Transition::Stay => Ok(from.to_string()),
        Transition::Terminate => Ok(terminal.to_string()),
        Transition::To(target) => match table {
            Some(table) if !table.permits(from, &target) => Err(FsmError::InvalidTransition {
                from: from.to_string(),
                to: target,
            }),
            _ => Ok(target),
        },
        Transition::Undecided => {
            let successors = table.map_or(&[][..], |t| t.successors(from));
            match successors {
                [] => Ok(terminal.to_string()),
                [only] => Ok(only.clone()),
                many => Err(FsmError::TransitionRequired {
                    state: from.to_string(),
                    candidates: many.to_vec(),
                }),
            }
        }
    }
}
