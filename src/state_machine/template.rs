//! Prompt templates
//!
//! A template is either literal text with `{name}` placeholders or a function
//! of the read-only context view. Placeholders resolve against context
//! entries, then the turn's computed values; `{{` and `}}` produce literal
//! braces.

use super::context::ContextView;
use super::error::{FsmError, FsmResult, RenderError};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub type TemplateFn = Arc<dyn Fn(&ContextView<'_>) -> FsmResult<String> + Send + Sync>;

#[derive(Clone)]
pub enum Template {
    Literal(String),
    Computed(TemplateFn),
}

impl Template {
    pub fn literal(text: impl Into<String>) -> Self {
        Template::Literal(text.into())
    }

    pub fn computed(f: impl Fn(&ContextView<'_>) -> FsmResult<String> + Send + Sync + 'static) -> Self {
        Template::Computed(Arc::new(f))
    }

    /// Render for `state`, naming the state in any error
    pub fn render(&self, state: &str, view: &ContextView<'_>) -> FsmResult<String> {
        match self {
            Template::Literal(text) => {
                fill(text, |key| resolve(view, key)).map_err(|e| FsmError::render(state, e))
            }
            Template::Computed(f) => f(view),
        }
    }

    /// Syntax check for literal templates; computed ones always pass
    pub fn check(&self) -> Result<(), RenderError> {
        match self {
            Template::Literal(text) => fill(text, |_| Some(String::new())).map(|_| ()),
            Template::Computed(_) => Ok(()),
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Template::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for Template {
    fn from(text: &str) -> Self {
        Template::literal(text)
    }
}

impl From<String> for Template {
    fn from(text: String) -> Self {
        Template::Literal(text)
    }
}

fn resolve(view: &ContextView<'_>, key: &str) -> Option<String> {
    let value = match view.lookup(key) {
        Some(value) => value,
        None if view.has_computed(key) => view.computed(key).ok()?,
        None => return None,
    };
    Some(value_to_text(&value))
}

/// Strings render bare, everything else as compact JSON
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{key}` placeholders using `lookup`.
pub fn fill(
    template: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' => {
                if chars.next_if(|&(_, next)| next == '{').is_some() {
                    out.push('{');
                    continue;
                }
                let mut key = String::new();
                let mut closed = false;
                for (_, k) in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    return Err(RenderError::Unterminated(pos));
                }
                let key = key.trim();
                let value = lookup(key).ok_or_else(|| RenderError::MissingKey(key.to_string()))?;
                out.push_str(&value);
            }
            '}' => {
                if chars.next_if(|&(_, next)| next == '}').is_none() {
                    return Err(RenderError::UnmatchedClose(pos));
                }
                out.push('}');
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}
