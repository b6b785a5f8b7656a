//! Conversation-scoped key/value store
//!
//! Plain entries are JSON values keyed by name. Three entries are reserved and
//! typed: the chat history, the live user input, and the tool calls fired by
//! the most recent turn. They are reachable through the generic lookup under
//! their reserved names, but can only be written with values of the right
//! shape.

use super::computed::ComputedValues;
use super::error::{FsmError, FsmResult};
use crate::llm::{LlmMessage, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const CHAT_HISTORY_KEY: &str = "chat_history";
pub const USER_INPUT_KEY: &str = "user_input";
pub const LAST_TOOL_CALLS_KEY: &str = "last_tool_calls";

/// Whether `key` names one of the typed reserved entries
pub fn is_reserved(key: &str) -> bool {
    matches!(key, CHAT_HISTORY_KEY | USER_INPUT_KEY | LAST_TOOL_CALLS_KEY)
}

/// The mutable store shared by every turn of one conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    values: BTreeMap<String, Value>,
    chat_history: Vec<LlmMessage>,
    user_input: Option<String>,
    last_tool_calls: Vec<ToolCall>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain (non-reserved) entry
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Any entry, reserved ones included, as an owned JSON value
    pub fn lookup(&self, key: &str) -> Option<Value> {
        match key {
            CHAT_HISTORY_KEY => serde_json::to_value(&self.chat_history).ok(),
            USER_INPUT_KEY => self.user_input.clone().map(Value::String),
            LAST_TOOL_CALLS_KEY => Some(self.last_tool_calls_value()),
            _ => self.values.get(key).cloned(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        match key {
            CHAT_HISTORY_KEY | LAST_TOOL_CALLS_KEY => true,
            USER_INPUT_KEY => self.user_input.is_some(),
            _ => self.values.contains_key(key),
        }
    }

    /// Set an entry. Reserved entries must carry a value of their own shape.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> FsmResult<()> {
        let key = key.into();
        match key.as_str() {
            CHAT_HISTORY_KEY => {
                self.chat_history = serde_json::from_value(value).map_err(|e| {
                    FsmError::Configuration(format!("'{CHAT_HISTORY_KEY}' must be a list of messages: {e}"))
                })?;
            }
            USER_INPUT_KEY => {
                self.user_input = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => {
                        return Err(FsmError::Configuration(format!(
                            "'{USER_INPUT_KEY}' must be a string, got {other}"
                        )))
                    }
                };
            }
            LAST_TOOL_CALLS_KEY => {
                return Err(FsmError::Configuration(format!(
                    "'{LAST_TOOL_CALLS_KEY}' is written by the machine only"
                )))
            }
            _ => {
                self.values.insert(key, value);
            }
        }
        Ok(())
    }

    /// Set every entry of `map`; all-or-nothing.
    pub fn merge(&mut self, map: Map<String, Value>) -> FsmResult<()> {
        let mut staged = self.clone();
        for (key, value) in map {
            staged.set(key, value)?;
        }
        *self = staged;
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
            && self.chat_history.is_empty()
            && self.user_input.is_none()
            && self.last_tool_calls.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn chat_history(&self) -> &[LlmMessage] {
        &self.chat_history
    }

    pub fn push_message(&mut self, message: LlmMessage) {
        self.chat_history.push(message);
    }

    pub fn user_input(&self) -> Option<&str> {
        self.user_input.as_deref()
    }

    pub fn set_user_input(&mut self, input: Option<String>) {
        self.user_input = input;
    }

    pub fn last_tool_calls(&self) -> &[ToolCall] {
        &self.last_tool_calls
    }

    pub(crate) fn set_last_tool_calls(&mut self, calls: Vec<ToolCall>) {
        self.last_tool_calls = calls;
    }

    /// Did tool `name` fire during the most recent turn?
    pub fn tool_fired(&self, name: &str) -> bool {
        self.last_tool_calls.iter().any(|c| c.name == name)
    }

    /// Arguments of the latest call to `name` in the most recent turn
    pub fn tool_arguments(&self, name: &str) -> Option<&Value> {
        self.last_tool_calls
            .iter()
            .rev()
            .find(|c| c.name == name)
            .map(|c| &c.arguments)
    }

    /// `{ tool_name: arguments }`, later calls to the same tool winning
    fn last_tool_calls_value(&self) -> Value {
        let map: Map<String, Value> = self
            .last_tool_calls
            .iter()
            .map(|c| (c.name.clone(), c.arguments.clone()))
            .collect();
        Value::Object(map)
    }

    /// Every entry, reserved ones included, as one JSON object
    pub fn to_value(&self) -> Value {
        let mut map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for key in [CHAT_HISTORY_KEY, USER_INPUT_KEY, LAST_TOOL_CALLS_KEY] {
            if let Some(value) = self.lookup(key) {
                map.insert(key.to_string(), value);
            }
        }
        Value::Object(map)
    }
}

/// Read-only view handed to templates, selectors and hooks.
///
/// Besides the context entries it exposes the turn's computed values.
#[derive(Clone, Copy)]
pub struct ContextView<'a> {
    context: &'a Context,
    computed: &'a ComputedValues<'a>,
}

impl<'a> ContextView<'a> {
    pub fn new(context: &'a Context, computed: &'a ComputedValues<'a>) -> Self {
        Self { context, computed }
    }

    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.context.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.context.get_str(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.context.get(key).and_then(Value::as_bool)
    }

    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.context.lookup(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.context.contains(key)
    }

    /// True when every key is present and not null or an empty string
    pub fn has_all(&self, keys: &[&str]) -> bool {
        keys.iter().all(|k| match self.context.get(k) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        })
    }

    pub fn user_input(&self) -> Option<&'a str> {
        self.context.user_input()
    }

    pub fn chat_history(&self) -> &'a [LlmMessage] {
        self.context.chat_history()
    }

    pub fn tool_fired(&self, name: &str) -> bool {
        self.context.tool_fired(name)
    }

    pub fn tool_arguments(&self, name: &str) -> Option<&'a Value> {
        self.context.tool_arguments(name)
    }

    /// Memoized computed value for this turn
    pub fn computed(&self, name: &str) -> FsmResult<Value> {
        self.computed.get(name, self.context)
    }

    pub fn has_computed(&self, name: &str) -> bool {
        self.computed.is_declared(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_plain_values() {
        let mut ctx = Context::new();
        ctx.set("a", json!(1)).unwrap();
        ctx.set("name", json!("Ana")).unwrap();
        assert_eq!(ctx.get("a"), Some(&json!(1)));
        assert_eq!(ctx.get_str("name"), Some("Ana"));
        assert!(ctx.get("missing").is_none());
    }

    #[test]
    fn test_reserved_user_input_must_be_string() {
        let mut ctx = Context::new();
        ctx.set(USER_INPUT_KEY, json!("hello")).unwrap();
        assert_eq!(ctx.user_input(), Some("hello"));
        assert!(ctx.set(USER_INPUT_KEY, json!(3)).is_err());
        assert_eq!(ctx.user_input(), Some("hello"));
        ctx.set(USER_INPUT_KEY, Value::Null).unwrap();
        assert!(ctx.user_input().is_none());
    }

    #[test]
    fn test_chat_history_roundtrips_through_lookup() {
        let mut ctx = Context::new();
        ctx.push_message(LlmMessage::user("hi"));
        ctx.push_message(LlmMessage::assistant("hello"));
        let history = ctx.lookup(CHAT_HISTORY_KEY).unwrap();
        assert_eq!(history[0]["role"], "user");
        assert_eq!(history[1]["content"], "hello");

        let mut other = Context::new();
        other.set(CHAT_HISTORY_KEY, history).unwrap();
        assert_eq!(other.chat_history(), ctx.chat_history());
    }

    #[test]
    fn test_last_tool_calls_is_machine_owned() {
        let mut ctx = Context::new();
        assert!(ctx.set(LAST_TOOL_CALLS_KEY, json!({})).is_err());
        ctx.set_last_tool_calls(vec![
            ToolCall::new("1", "detect_user_intent", json!({ "intention": "thanks" })),
            ToolCall::new("2", "detect_user_intent", json!({ "intention": "appointment" })),
        ]);
        assert!(ctx.tool_fired("detect_user_intent"));
        assert!(!ctx.tool_fired("end_call"));
        assert_eq!(
            ctx.tool_arguments("detect_user_intent"),
            Some(&json!({ "intention": "appointment" }))
        );
        assert_eq!(
            ctx.lookup(LAST_TOOL_CALLS_KEY).unwrap(),
            json!({ "detect_user_intent": { "intention": "appointment" } })
        );
    }

    #[test]
    fn test_merge_is_all_or_nothing() {
        let mut ctx = Context::new();
        ctx.set("a", json!(1)).unwrap();
        let mut patch = Map::new();
        patch.insert("b".to_string(), json!(2));
        patch.insert(USER_INPUT_KEY.to_string(), json!(false));
        assert!(ctx.merge(patch).is_err());
        assert!(ctx.get("b").is_none());

        let mut patch = Map::new();
        patch.insert("b".to_string(), json!(2));
        patch.insert("a".to_string(), json!(10));
        ctx.merge(patch).unwrap();
        assert_eq!(ctx.get("a"), Some(&json!(10)));
        assert_eq!(ctx.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut ctx = Context::new();
        ctx.set("a", json!(1)).unwrap();
        ctx.set_user_input(Some("x".to_string()));
        ctx.push_message(LlmMessage::user("x"));
        assert!(!ctx.is_empty());
        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_view_has_all_rejects_blank_values() {
        let mut ctx = Context::new();
        ctx.set("name", json!("Ana")).unwrap();
        ctx.set("phone", json!("")).unwrap();
        ctx.set("email", Value::Null).unwrap();
        let functions = BTreeMap::new();
        let computed = ComputedValues::new(&functions);
        let view = ContextView::new(&ctx, &computed);
        assert!(view.has_all(&["name"]));
        assert!(!view.has_all(&["name", "phone"]));
        assert!(!view.has_all(&["email"]));
        assert!(!view.has_all(&["missing"]));
    }
}
