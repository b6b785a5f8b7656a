//! `OpenAI` and `OpenAI`-compatible chat-completions provider

use super::types::{LlmMessage, LlmRequest, LlmResponse, ResponseFormat, ToolCall, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// OpenAI-compatible service implementation
pub struct OpenAIService {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIService {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self {
            client,
            api_key,
            base_url,
        }
    }

    fn translate_request(request: &LlmRequest) -> OpenAIRequest {
        let messages = request.messages.iter().map(Self::translate_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        let response_format = request.response_format.as_ref().and_then(|format| match format {
            ResponseFormat::Text => None,
            ResponseFormat::JsonObject => Some(json!({ "type": "json_object" })),
            ResponseFormat::JsonSchema { name, schema } => Some(json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema },
            })),
        });

        OpenAIRequest {
            model: request.model.clone(),
            messages,
            tools,
            response_format,
            temperature: request.temperature,
            stream: false,
            extra: request.extra.clone(),
        }
    }

    fn translate_message(msg: &LlmMessage) -> OpenAIMessage {
        OpenAIMessage {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content.clone()),
            tool_calls: None,
        }
    }

    fn normalize_response(resp: OpenAIResponse) -> Result<LlmResponse, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No choices in response"))?;

        let content = choice.message.content.filter(|text| !text.is_empty());

        let mut tool_calls = Vec::new();
        for tc in choice.message.tool_calls.unwrap_or_default() {
            if tc.function.name.is_empty() {
                continue;
            }
            // Unparsable arguments are kept verbatim; the extractor rejects
            // anything that is not an object.
            let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                tracing::warn!(error = %e, tool = %tc.function.name, "Failed to parse tool call arguments");
                Value::String(tc.function.arguments.clone())
            });
            tool_calls.push(ToolCall::new(tc.id, tc.function.name, arguments));
        }

        let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u64::from(u.prompt_tokens),
            output_tokens: u64::from(u.completion_tokens),
        });

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
        })
    }

    fn classify_status(status: reqwest::StatusCode, message: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::auth(format!("Authentication failed: {message}")),
            429 => LlmError::rate_limit(format!("Rate limit exceeded: {message}")),
            400 => LlmError::invalid_request(format!("Invalid request: {message}")),
            500..=599 => LlmError::server_error(format!("Server error: {message}")),
            _ => LlmError::unknown(format!("HTTP {status}: {message}")),
        }
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let openai_request = Self::translate_request(request);

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            if let Ok(error_resp) = serde_json::from_str::<OpenAIErrorResponse>(&body) {
                return Err(Self::classify_status(status, &error_resp.error.message));
            }
            return Err(Self::classify_status(status, &body));
        }

        let openai_response: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::normalize_response(openai_response)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(default)]
    r#type: Option<String>,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;

    fn request() -> LlmRequest {
        LlmRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![LlmMessage::system("be brief"), LlmMessage::user("hi")],
            tools: vec![ToolDefinition::new(
                "detect_user_intent",
                "Detect intent",
                json!({ "type": "object", "properties": { "intention": { "type": "string" } } }),
            )],
            response_format: Some(ResponseFormat::JsonObject),
            temperature: Some(0.2),
            extra: Map::new(),
        }
    }

    #[test]
    fn test_translate_request_shape() {
        let mut req = request();
        req.extra.insert("seed".to_string(), json!(7));
        let body = serde_json::to_value(OpenAIService::translate_request(&req)).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "detect_user_intent");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["seed"], 7);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_translate_request_omits_empty_tools_and_text_format() {
        let mut req = request();
        req.tools.clear();
        req.response_format = Some(ResponseFormat::Text);
        let body = serde_json::to_value(OpenAIService::translate_request(&req)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_normalize_response_with_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "detect_user_intent", "arguments": "{\"intention\":\"appointment\"}" }
                    }]
                }
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 3 }
        });
        let resp: OpenAIResponse = serde_json::from_value(raw).unwrap();
        let normalized = OpenAIService::normalize_response(resp).unwrap();

        assert!(normalized.content.is_none());
        assert_eq!(normalized.tool_calls.len(), 1);
        assert_eq!(normalized.tool_calls[0].arguments["intention"], "appointment");
        assert_eq!(normalized.usage.total(), 13);
    }

    #[test]
    fn test_normalize_response_keeps_bad_arguments_verbatim() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "ok",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "end_call", "arguments": "{not json" }
                    }]
                }
            }]
        });
        let resp: OpenAIResponse = serde_json::from_value(raw).unwrap();
        let normalized = OpenAIService::normalize_response(resp).unwrap();
        assert_eq!(normalized.content.as_deref(), Some("ok"));
        assert_eq!(normalized.tool_calls[0].arguments, Value::String("{not json".to_string()));
    }

    #[test]
    fn test_normalize_response_without_choices_fails() {
        let resp: OpenAIResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(OpenAIService::normalize_response(resp).is_err());
    }

    #[test]
    fn test_classify_status() {
        use crate::llm::LlmErrorKind;
        let cases = [
            (401, LlmErrorKind::Auth),
            (429, LlmErrorKind::RateLimit),
            (400, LlmErrorKind::InvalidRequest),
            (503, LlmErrorKind::ServerError),
            (418, LlmErrorKind::Unknown),
        ];
        for (code, kind) in cases {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            assert_eq!(OpenAIService::classify_status(status, "x").kind, kind);
        }
    }
}
