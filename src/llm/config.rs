//! Gateway configuration, read from the environment

use super::{LlmService, LoggingService, OpenAIService};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the completion gateway
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// Chat-completions endpoint (`OpenAI` or any compatible server)
    pub base_url: String,
    pub default_model: String,
    pub default_temperature: f32,
    /// Deadline applied to every completion call
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; unparsable numbers fall back
    /// to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            api_key: lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()),
            base_url: lookup("LLM_BASE_URL").unwrap_or(defaults.base_url),
            default_model: lookup("DEFAULT_MODEL").unwrap_or(defaults.default_model),
            default_temperature: lookup("DEFAULT_TEMPERATURE")
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.default_temperature),
            timeout: lookup("LLM_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map_or(defaults.timeout, Duration::from_secs),
        }
    }

    /// Whether a gateway can be built from this configuration
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// Create the logging-wrapped gateway, or `None` without an API key
    pub fn build_service(&self) -> Option<Arc<dyn LlmService>> {
        let api_key = self.api_key.clone()?;
        let service: Arc<dyn LlmService> =
            Arc::new(OpenAIService::new(api_key, self.base_url.clone(), self.timeout));
        Some(Arc::new(LoggingService::new(service)))
    }
}
