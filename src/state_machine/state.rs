//! State descriptors
//!
//! A descriptor is the immutable definition of one turn. It is assembled with
//! [`StateBuilder`], validated once by [`StateBuilder::build`], and then
//! shared read-only (behind an `Arc`) by every conversation that runs it.

use super::computed::ComputedFn;
use super::context::{is_reserved, Context, ContextView};
use super::error::{FsmError, FsmResult};
use super::prompt::{GoalPrompt, HistoryEntry};
use super::template::Template;
use super::transition::{ConditionalSelector, SelectorFn, Transition};
use crate::llm::{ResponseFormat, ToolCall, ToolDefinition};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Default entry the content channel writes to
pub const DEFAULT_OUTPUT_VAR: &str = "result";

pub type InputHook = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type AnswerHook = Arc<dyn Fn(Value) -> FsmResult<Value> + Send + Sync>;
pub type ToolCallHook =
    Arc<dyn Fn(&ToolCall, &ContextView<'_>) -> FsmResult<Map<String, Value>> + Send + Sync>;

/// Where the content channel writes its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPolicy {
    pub var: String,
    /// Merge record answers field by field instead of storing them under `var`
    pub merge_records: bool,
}

impl Default for OutputPolicy {
    fn default() -> Self {
        Self {
            var: DEFAULT_OUTPUT_VAR.to_string(),
            merge_records: true,
        }
    }
}

pub struct StateDescriptor {
    pub(crate) key: String,
    pub(crate) system_message: Option<Template>,
    pub(crate) goal: Option<GoalPrompt>,
    pub(crate) user_input: Option<Template>,
    pub(crate) history: Option<Vec<HistoryEntry>>,
    pub(crate) restart_history: bool,
    pub(crate) tools: Vec<ToolDefinition>,
    pub(crate) response_format: Option<ResponseFormat>,
    pub(crate) response_validator: Option<Arc<jsonschema::Validator>>,
    pub(crate) output: OutputPolicy,
    pub(crate) tool_prefix: Option<String>,
    pub(crate) computed: BTreeMap<String, ComputedFn>,
    pub(crate) selector: SelectorFn,
    pub(crate) model: Option<String>,
    pub(crate) temperature: Option<f32>,
    pub(crate) extra: Map<String, Value>,
    pub(crate) preprocess_input: Option<InputHook>,
    pub(crate) process_answer: Option<AnswerHook>,
    pub(crate) process_tool_call: Option<ToolCallHook>,
}

impl StateDescriptor {
    pub fn builder(key: impl Into<String>) -> StateBuilder {
        StateBuilder::new(key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn output(&self) -> &OutputPolicy {
        &self.output
    }

    pub fn tool_prefix(&self) -> Option<&str> {
        self.tool_prefix.as_deref()
    }

    pub fn response_format(&self) -> Option<&ResponseFormat> {
        self.response_format.as_ref()
    }

    pub(crate) fn select(&self, view: &ContextView<'_>) -> FsmResult<Transition> {
        (self.selector)(view)
    }
}

impl fmt::Debug for StateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDescriptor")
            .field("key", &self.key)
            .field("tools", &self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .field("response_format", &self.response_format)
            .field("output", &self.output)
            .field("tool_prefix", &self.tool_prefix)
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StateDescriptor`]
pub struct StateBuilder {
    key: String,
    system_message: Option<Template>,
    goal: Option<GoalPrompt>,
    user_input: Option<Template>,
    history: Option<Vec<HistoryEntry>>,
    restart_history: bool,
    tools: Vec<ToolDefinition>,
    response_format: Option<ResponseFormat>,
    output: OutputPolicy,
    tool_prefix: Option<String>,
    computed: BTreeMap<String, ComputedFn>,
    selector: Option<SelectorFn>,
    model: Option<String>,
    temperature: Option<f32>,
    extra: Map<String, Value>,
    preprocess_input: Option<InputHook>,
    process_answer: Option<AnswerHook>,
    process_tool_call: Option<ToolCallHook>,
}

impl StateBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            system_message: None,
            goal: None,
            user_input: None,
            history: None,
            restart_history: false,
            tools: Vec::new(),
            response_format: None,
            output: OutputPolicy::default(),
            tool_prefix: None,
            computed: BTreeMap::new(),
            selector: None,
            model: None,
            temperature: None,
            extra: Map::new(),
            preprocess_input: None,
            process_answer: None,
            process_tool_call: None,
        }
    }

    #[must_use]
    pub fn system_message(mut self, template: impl Into<Template>) -> Self {
        self.system_message = Some(template.into());
        self
    }

    /// Compose the system message from a goal description
    #[must_use]
    pub fn goal(mut self, goal: GoalPrompt) -> Self {
        self.goal = Some(goal);
        self
    }

    #[must_use]
    pub fn user_input(mut self, template: impl Into<Template>) -> Self {
        self.user_input = Some(template.into());
        self
    }

    #[must_use]
    pub fn history(mut self, entries: Vec<HistoryEntry>) -> Self {
        self.history = Some(entries);
        self
    }

    /// Send no persisted history with this state's prompt
    #[must_use]
    pub fn restart_history(mut self) -> Self {
        self.restart_history = true;
        self
    }

    #[must_use]
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        self.tools.extend(tools);
        self
    }

    #[must_use]
    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    #[must_use]
    pub fn output_var(mut self, var: impl Into<String>) -> Self {
        self.output.var = var.into();
        self
    }

    /// Store record answers whole under the output variable
    #[must_use]
    pub fn keep_records(mut self) -> Self {
        self.output.merge_records = false;
        self
    }

    #[must_use]
    pub fn tool_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn computed(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Context) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.computed.insert(name.into(), Arc::new(f));
        self
    }

    #[must_use]
    pub fn selector(
        mut self,
        f: impl Fn(&ContextView<'_>) -> FsmResult<Transition> + Send + Sync + 'static,
    ) -> Self {
        self.selector = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn conditions(mut self, conditions: ConditionalSelector) -> Self {
        self.selector = Some(conditions.into_selector());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Extra gateway option passed through verbatim
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn preprocess_input(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.preprocess_input = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn process_answer(
        mut self,
        f: impl Fn(Value) -> FsmResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.process_answer = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn process_tool_call(
        mut self,
        f: impl Fn(&ToolCall, &ContextView<'_>) -> FsmResult<Map<String, Value>> + Send + Sync + 'static,
    ) -> Self {
        self.process_tool_call = Some(Arc::new(f));
        self
    }

    /// Validate and freeze the descriptor
    ///
    /// # Errors
    ///
    /// `FsmError::Configuration` for an empty key, a reserved or empty output
    /// variable, a malformed template, a tool declared twice or an invalid
    /// response schema.
    pub fn build(self) -> FsmResult<StateDescriptor> {
        let key = self.key;
        let malformed = |what: &str| FsmError::Configuration(format!("state '{key}': {what}"));

        if key.trim().is_empty() {
            return Err(FsmError::Configuration("state key must not be empty".to_string()));
        }
        if self.output.var.is_empty() || is_reserved(&self.output.var) {
            return Err(malformed(&format!(
                "output variable '{}' is empty or reserved",
                self.output.var
            )));
        }

        let templates = self
            .system_message
            .iter()
            .chain(self.user_input.iter())
            .chain(self.goal.iter().map(GoalPrompt::text))
            .chain(self.history.iter().flatten().map(|entry| &entry.content));
        for template in templates {
            template
                .check()
                .map_err(|e| malformed(&format!("malformed template: {e}")))?;
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(malformed(&format!("tool '{}' declared twice", tool.name)));
            }
        }

        let response_validator = match &self.response_format {
            Some(ResponseFormat::JsonSchema { schema, .. }) => Some(Arc::new(
                jsonschema::Validator::new(schema)
                    .map_err(|e| malformed(&format!("invalid response schema: {e}")))?,
            )),
            _ => None,
        };

        let selector = self
            .selector
            .unwrap_or_else(|| Arc::new(|_: &ContextView<'_>| Ok(Transition::Undecided)));

        Ok(StateDescriptor {
            key,
            system_message: self.system_message,
            goal: self.goal,
            user_input: self.user_input,
            history: self.history,
            restart_history: self.restart_history,
            tools: self.tools,
            response_format: self.response_format,
            response_validator,
            output: self.output,
            tool_prefix: self.tool_prefix,
            computed: self.computed,
            selector,
            model: self.model,
            temperature: self.temperature,
            extra: self.extra,
            preprocess_input: self.preprocess_input,
            process_answer: self.process_answer,
            process_tool_call: self.process_tool_call,
        })
    }
}
