//! Single-turn execution
//!
//! A turn works on a private copy of the context. The gateway call is the only
//! suspension point; prompt rendering, response processing and selection are
//! synchronous. The staged context is handed back to the run loop, which
//! commits it only once the transition has also been validated.

use super::computed::ComputedValues;
use super::context::{Context, ContextView};
use super::error::FsmResult;
use super::extract::apply_response;
use super::prompt::assemble_messages;
use super::state::StateDescriptor;
use super::transition::Transition;
use crate::llm::{
    LlmConfig, LlmError, LlmMessage, LlmRequest, LlmResponse, LlmService, ToolDefinition,
};
use std::collections::HashSet;
use std::time::Duration;

/// Machine-wide settings a state falls back to
#[derive(Debug, Clone)]
pub struct MachineDefaults {
    pub model: String,
    pub temperature: Option<f32>,
    /// Deadline for the gateway call; `None` waits indefinitely
    pub gateway_timeout: Option<Duration>,
    /// Turns per run when the caller gives no budget
    pub step_budget: usize,
    /// Declared in every state after the state's own tools
    pub common_tools: Vec<ToolDefinition>,
}

impl Default for MachineDefaults {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

impl MachineDefaults {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: Some(config.default_temperature),
            gateway_timeout: Some(config.timeout),
            step_budget: 1,
            common_tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_common_tools(mut self, tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        self.common_tools.extend(tools);
        self
    }
}

/// A successful turn, not yet committed
#[derive(Debug)]
pub struct TurnOutcome {
    pub context: Context,
    pub transition: Transition,
}

/// Execute one turn of `state` against `base`, which carries the turn's user
/// input. Turns chained within one run carry none and record no user entry.
///
/// # Errors
///
/// Prompt rendering, gateway (including deadline expiry), validation and
/// selector failures are returned as they occur. `base` is consumed either
/// way, so the caller's context is never touched.
pub async fn execute_turn(
    state: &StateDescriptor,
    base: Context,
    gateway: &dyn LlmService,
    defaults: &MachineDefaults,
) -> FsmResult<TurnOutcome> {
    let computed = ComputedValues::new(&state.computed);
    let request = build_request(state, &base, &computed, defaults)?;

    tracing::debug!(
        state = %state.key,
        model = %request.model,
        messages = request.messages.len(),
        tools = request.tools.len(),
        "Sending turn to gateway"
    );
    let response = call_gateway(gateway, &request, defaults.gateway_timeout).await?;

    let mut draft = base;
    apply_response(state, &response, &mut draft, &computed)?;

    if let Some(text) = draft.user_input().map(str::to_string) {
        draft.push_message(LlmMessage::user(text));
    }
    draft.push_message(LlmMessage::assistant(response.content.unwrap_or_default()));

    let transition = state.select(&ContextView::new(&draft, &computed))?;
    tracing::debug!(
        state = %state.key,
        transition = ?transition,
        computed = ?computed.evaluated(),
        "Turn processed"
    );

    Ok(TurnOutcome {
        context: draft,
        transition,
    })
}

fn build_request(
    state: &StateDescriptor,
    context: &Context,
    computed: &ComputedValues<'_>,
    defaults: &MachineDefaults,
) -> FsmResult<LlmRequest> {
    let messages = assemble_messages(state, &ContextView::new(context, computed))?;

    let mut seen: HashSet<&str> = state.tools.iter().map(|t| t.name.as_str()).collect();
    let mut tools = state.tools.clone();
    for tool in &defaults.common_tools {
        if seen.insert(tool.name.as_str()) {
            tools.push(tool.clone());
        }
    }

    Ok(LlmRequest {
        model: state.model.clone().unwrap_or_else(|| defaults.model.clone()),
        messages,
        tools,
        response_format: state.response_format.clone(),
        temperature: state.temperature.or(defaults.temperature),
        extra: state.extra.clone(),
    })
}

async fn call_gateway(
    gateway: &dyn LlmService,
    request: &LlmRequest,
    deadline: Option<Duration>,
) -> Result<LlmResponse, LlmError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, gateway.complete(request))
            .await
            .map_err(|_| LlmError::timeout(limit))?,
        None => gateway.complete(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmErrorKind, MessageRole};
    use crate::runtime::testing::{DelayedMockLlmService, MockLlmService};
    use crate::state_machine::error::FsmError;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, format!("{name} tool"), json!({ "type": "object" }))
    }

    fn base(input: &str) -> Context {
        let mut ctx = Context::new();
        ctx.set_user_input(Some(input.to_string()));
        ctx
    }

    #[tokio::test]
    async fn test_plain_turn_appends_user_then_assistant() {
        let gateway = MockLlmService::new();
        gateway.queue_response(LlmResponse::text("Hi! How can I help?"));
        let state = StateDescriptor::builder("s").build().unwrap();

        let outcome = execute_turn(&state, base("hello"), &gateway, &MachineDefaults::default())
            .await
            .unwrap();

        let history = outcome.context.chat_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], LlmMessage::user("hello"));
        assert_eq!(history[1], LlmMessage::assistant("Hi! How can I help?"));
        assert_eq!(outcome.transition, Transition::Undecided);
    }

    #[tokio::test]
    async fn test_turn_without_input_records_only_the_answer() {
        let gateway = MockLlmService::new();
        gateway.queue_response(LlmResponse::text("Anything else?"));
        let state = StateDescriptor::builder("s").build().unwrap();

        let outcome = execute_turn(&state, Context::new(), &gateway, &MachineDefaults::default())
            .await
            .unwrap();

        assert_eq!(outcome.context.chat_history(), &[LlmMessage::assistant("Anything else?")]);
        let request = &gateway.recorded_requests()[0];
        assert!(request.messages.iter().all(|m| m.role != MessageRole::User));
    }

    #[tokio::test]
    async fn test_request_uses_state_overrides_and_common_tools() {
        let gateway = MockLlmService::new();
        gateway.queue_response(LlmResponse::text("ok"));
        let state = StateDescriptor::builder("s")
            .tool(tool("check_availability"))
            .tool(tool("end_call"))
            .model("gpt-4o")
            .extra("seed", json!(1))
            .build()
            .unwrap();
        let defaults = MachineDefaults::default().with_common_tools([tool("end_call"), tool("detect_user_intent")]);

        execute_turn(&state, base("hi"), &gateway, &defaults).await.unwrap();

        let request = &gateway.recorded_requests()[0];
        let names: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["check_availability", "end_call", "detect_user_intent"]);
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.temperature, defaults.temperature);
        assert_eq!(request.extra["seed"], 1);
        assert_eq!(request.messages.last().map(|m| m.role), Some(MessageRole::User));
    }

    #[tokio::test]
    async fn test_gateway_error_passes_through() {
        let gateway = MockLlmService::new();
        gateway.queue_error(LlmError::rate_limit("slow down"));
        let state = StateDescriptor::builder("s").build().unwrap();

        let err = execute_turn(&state, base("hi"), &gateway, &MachineDefaults::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FsmError::Gateway(e) if e.kind == LlmErrorKind::RateLimit));
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_timeout_error() {
        let gateway = DelayedMockLlmService::new(Duration::from_secs(5));
        gateway.queue_response(LlmResponse::text("too late"));
        let state = StateDescriptor::builder("s").build().unwrap();
        let defaults = MachineDefaults {
            gateway_timeout: Some(Duration::from_millis(20)),
            ..MachineDefaults::default()
        };

        let err = execute_turn(&state, base("hi"), &gateway, &defaults).await.unwrap_err();
        assert!(matches!(err, FsmError::Gateway(e) if e.kind == LlmErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_render_error_skips_gateway() {
        let gateway = MockLlmService::new();
        let state = StateDescriptor::builder("s")
            .system_message("Slots for {appointment_date}")
            .build()
            .unwrap();

        let err = execute_turn(&state, base("hi"), &gateway, &MachineDefaults::default())
            .await
            .unwrap_err();
        assert_eq!(err.missing_key(), Some("appointment_date"));
        assert!(gateway.recorded_requests().is_empty());
    }
}
