//! State registry

use super::error::{FsmError, FsmResult};
use super::state::StateDescriptor;
use std::collections::HashMap;
use std::sync::Arc;

/// State key to descriptor. Filled at configuration time, read-only after.
#[derive(Debug, Clone, Default)]
pub struct StateRegistry {
    states: HashMap<String, Arc<StateDescriptor>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `descriptor` under its own key. Keys are unique.
    ///
    /// # Errors
    ///
    /// `FsmError::Configuration` when the key is already registered.
    pub fn register(&mut self, descriptor: StateDescriptor) -> FsmResult<Arc<StateDescriptor>> {
        if self.states.contains_key(descriptor.key()) {
            return Err(FsmError::Configuration(format!(
                "state '{}' is already registered",
                descriptor.key()
            )));
        }
        let descriptor = Arc::new(descriptor);
        self.states
            .insert(descriptor.key().to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// # Errors
    ///
    /// `FsmError::UnknownState` when nothing is registered under `key`.
    pub fn lookup(&self, key: &str) -> FsmResult<Arc<StateDescriptor>> {
        self.states
            .get(key)
            .cloned()
            .ok_or_else(|| FsmError::UnknownState(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.states.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
