//! Response processing
//!
//! Folds a gateway response into the staged context of a turn. The content
//! channel is applied first, then every tool call in order, so a tool call
//! can override a value the answer also set. Any failure leaves the staged
//! context half-written; the caller discards it.

use super::computed::ComputedValues;
use super::context::{is_reserved, Context, ContextView};
use super::error::{FsmError, FsmResult};
use super::state::StateDescriptor;
use crate::llm::{LlmResponse, ResponseFormat, ToolCall};
use serde_json::{Map, Value};

pub(crate) fn apply_response(
    state: &StateDescriptor,
    response: &LlmResponse,
    draft: &mut Context,
    computed: &ComputedValues<'_>,
) -> FsmResult<()> {
    apply_content(state, response.content.as_deref(), draft)?;

    for call in &response.tool_calls {
        let vars = {
            let view = ContextView::new(draft, computed);
            tool_variables(state, call, &view)?
        };
        for (field, value) in vars {
            let key = match &state.tool_prefix {
                Some(prefix) => format!("{prefix}{field}"),
                None => field,
            };
            write_entry(draft, key, value, &call.name)?;
        }
    }

    draft.set_last_tool_calls(response.tool_calls.clone());
    Ok(())
}

fn apply_content(state: &StateDescriptor, content: Option<&str>, draft: &mut Context) -> FsmResult<()> {
    let Some(answer) = parse_content(state, content)? else {
        // No text this turn; clear the answer so a relay never replays a stale one
        draft.set(state.output.var.clone(), Value::Null)?;
        return Ok(());
    };

    let answer = match &state.process_answer {
        Some(hook) => hook(answer)?,
        None => answer,
    };

    match answer {
        Value::Object(fields) if state.output.merge_records => {
            // the record carries no single answer; a field of the same name may still set one
            draft.set(state.output.var.clone(), Value::Null)?;
            for (key, value) in fields {
                write_entry(draft, key, value, "answer")?;
            }
            Ok(())
        }
        other => draft.set(state.output.var.clone(), other),
    }
}

/// Parse the content channel against the state's response contract
pub(crate) fn parse_content(state: &StateDescriptor, content: Option<&str>) -> FsmResult<Option<Value>> {
    let format = state.response_format.as_ref().unwrap_or(&ResponseFormat::Text);
    if !format.is_structured() {
        return Ok(content.map(|text| Value::String(text.to_string())));
    }

    let text = content.ok_or_else(|| {
        FsmError::Validation(format!("state '{}' expects a structured answer, got none", state.key))
    })?;
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| FsmError::Validation(format!("answer is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(FsmError::Validation(format!("answer must be a JSON object, got {value}")));
    }

    if let Some(validator) = &state.response_validator {
        let problems: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("{}: {e}", e.instance_path))
            .collect();
        if !problems.is_empty() {
            return Err(FsmError::Validation(problems.join("; ")));
        }
    }

    Ok(Some(value))
}

fn tool_variables(
    state: &StateDescriptor,
    call: &ToolCall,
    view: &ContextView<'_>,
) -> FsmResult<Map<String, Value>> {
    if !call.arguments.is_object() {
        return Err(FsmError::Validation(format!(
            "arguments of tool '{}' are not an object: {}",
            call.name, call.arguments
        )));
    }
    match &state.process_tool_call {
        Some(hook) => hook(call, view),
        None => Ok(call.arguments.as_object().cloned().unwrap_or_default()),
    }
}

fn write_entry(draft: &mut Context, key: String, value: Value, source: &str) -> FsmResult<()> {
    if is_reserved(&key) {
        return Err(FsmError::Validation(format!(
            "{source} tried to overwrite reserved entry '{key}'"
        )));
    }
    draft.set(key, value)
}
