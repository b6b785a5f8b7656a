//! Errors surfaced by the state machine

use crate::llm::LlmError;
use thiserror::Error;

/// Why a template could not be rendered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("template references missing context key '{0}'")]
    MissingKey(String),
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
    #[error("unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),
}

/// Errors that can occur while configuring or running a machine.
///
/// Every variant reaches the caller of `run` unmodified; a failed turn never
/// leaves partial updates behind in the context.
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("state '{0}' is not registered")]
    UnknownState(String),

    #[error("prompt for state '{state}': {source}")]
    PromptRender {
        state: String,
        #[source]
        source: RenderError,
    },

    #[error("response validation failed: {0}")]
    Validation(String),

    #[error("computed value '{0}' is not declared")]
    UnknownComputedValue(String),

    #[error("transition from '{from}' to '{to}' is not allowed")]
    InvalidTransition { from: String, to: String },

    #[error("state '{state}' must choose a successor explicitly among {candidates:?}")]
    TransitionRequired {
        state: String,
        candidates: Vec<String>,
    },

    #[error("completion gateway error: {0}")]
    Gateway(#[from] LlmError),
}

impl FsmError {
    pub fn render(state: impl Into<String>, source: RenderError) -> Self {
        FsmError::PromptRender {
            state: state.into(),
            source,
        }
    }

    /// The render error's missing key, if this is one
    pub fn missing_key(&self) -> Option<&str> {
        match self {
            FsmError::PromptRender {
                source: RenderError::MissingKey(key),
                ..
            } => Some(key),
            _ => None,
        }
    }
}

pub type FsmResult<T> = Result<T, FsmError>;
