//! Per-turn memoization of derived values
//!
//! A state declares named functions of the context. During one turn each of
//! them runs at most once, on first read; the cache is dropped with the turn.
//!
//! Functions must not mutate anything they can reach through captured state
//! in a way that affects the context. This is a caller contract and is not
//! checked at runtime.

use super::context::Context;
use super::error::{FsmError, FsmResult};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

/// A named derived value
pub type ComputedFn = Arc<dyn Fn(&Context) -> Value + Send + Sync>;

/// Read-through cache over a state's computed-value functions
pub struct ComputedValues<'a> {
    functions: &'a BTreeMap<String, ComputedFn>,
    cache: HashMap<&'a str, OnceLock<Value>>,
}

impl<'a> ComputedValues<'a> {
    pub fn new(functions: &'a BTreeMap<String, ComputedFn>) -> Self {
        let cache = functions
            .keys()
            .map(|name| (name.as_str(), OnceLock::new()))
            .collect();
        Self { functions, cache }
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Value of `name`, computed against `context` on the first call and
    /// returned from the cache afterwards.
    pub fn get(&self, name: &str, context: &Context) -> FsmResult<Value> {
        let (Some(slot), Some(function)) = (self.cache.get(name), self.functions.get(name)) else {
            return Err(FsmError::UnknownComputedValue(name.to_string()));
        };
        Ok(slot.get_or_init(|| function(context)).clone())
    }

    /// Names evaluated so far this turn
    pub fn evaluated(&self) -> Vec<&'a str> {
        let mut names: Vec<&str> = self
            .cache
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(name, _)| *name)
            .collect();
        names.sort_unstable();
        names
    }
}
