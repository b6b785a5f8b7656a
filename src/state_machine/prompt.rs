//! Prompt assembly
//!
//! Renders a descriptor's templates into the ordered message list sent to the
//! gateway for one turn: system message, prior history, then the user entry.
//! Rendering only reads the context.

use super::context::ContextView;
use super::error::FsmResult;
use super::state::StateDescriptor;
use super::template::Template;
use crate::llm::LlmMessage;

/// Role of a declared history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRole {
    System,
    User,
    Assistant,
    /// Splice the live chat history in at this position
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: Template,
}

impl HistoryEntry {
    pub fn system(content: impl Into<Template>) -> Self {
        Self {
            role: HistoryRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<Template>) -> Self {
        Self {
            role: HistoryRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<Template>) -> Self {
        Self {
            role: HistoryRole::Assistant,
            content: content.into(),
        }
    }

    pub fn chat_history() -> Self {
        Self {
            role: HistoryRole::Placeholder,
            content: Template::literal(""),
        }
    }
}

const DEFAULT_OUT_OF_SCOPE: &str = "politely say that you can only help with the topics above \
and steer the conversation back to them.";

/// Goal-oriented description a system message is composed from
#[derive(Debug, Clone)]
pub struct GoalPrompt {
    goal: Template,
    required_fields: Vec<String>,
    intent_replies: Vec<(String, String)>,
    out_of_scope: String,
}

impl GoalPrompt {
    pub fn new(goal: impl Into<Template>) -> Self {
        Self {
            goal: goal.into(),
            required_fields: Vec::new(),
            intent_replies: Vec::new(),
            out_of_scope: DEFAULT_OUT_OF_SCOPE.to_string(),
        }
    }

    /// Information the model must collect before the state can be left
    #[must_use]
    pub fn require<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Canned reply instruction for a detected user intent
    #[must_use]
    pub fn reply(mut self, intent: impl Into<String>, instruction: impl Into<String>) -> Self {
        self.intent_replies.push((intent.into(), instruction.into()));
        self
    }

    #[must_use]
    pub fn out_of_scope(mut self, instruction: impl Into<String>) -> Self {
        self.out_of_scope = instruction.into();
        self
    }

    pub fn text(&self) -> &Template {
        &self.goal
    }

    pub fn render(&self, state: &str, view: &ContextView<'_>) -> FsmResult<String> {
        let mut sections = vec![self.goal.render(state, view)?];

        if !self.required_fields.is_empty() {
            let fields: Vec<String> = self.required_fields.iter().map(|f| format!("- {f}")).collect();
            sections.push(format!(
                "Collect the following information from the user:\n{}",
                fields.join("\n")
            ));
        }

        if !self.intent_replies.is_empty() {
            let replies: Vec<String> = self
                .intent_replies
                .iter()
                .map(|(intent, instruction)| format!("- If the user wants {intent}: {instruction}"))
                .collect();
            sections.push(format!(
                "Reply according to the user's intent:\n{}",
                replies.join("\n")
            ));
        }

        sections.push(format!(
            "If the user asks for something outside of this scope, {}",
            self.out_of_scope
        ));
        Ok(sections.join("\n\n"))
    }
}

/// Goal block first, then the state's own instruction
pub fn compose_system_message(
    state: &StateDescriptor,
    view: &ContextView<'_>,
) -> FsmResult<Option<String>> {
    let mut parts = Vec::new();
    if let Some(goal) = &state.goal {
        parts.push(goal.render(&state.key, view)?);
    }
    if let Some(template) = &state.system_message {
        parts.push(template.render(&state.key, view)?);
    }
    parts.retain(|p| !p.trim().is_empty());
    Ok((!parts.is_empty()).then(|| parts.join("\n\n")))
}

/// Build the full message list for one turn of `state`.
pub fn assemble_messages(
    state: &StateDescriptor,
    view: &ContextView<'_>,
) -> FsmResult<Vec<LlmMessage>> {
    let mut messages = match &state.history {
        Some(entries) => render_history(state, entries, view)?,
        None if state.restart_history => Vec::new(),
        None => view.chat_history().to_vec(),
    };

    if let Some(system) = compose_system_message(state, view)? {
        messages.insert(0, LlmMessage::system(system));
    }

    if let Some(template) = &state.user_input {
        messages.push(LlmMessage::user(template.render(&state.key, view)?));
    } else if let Some(input) = view.user_input() {
        let input = match &state.preprocess_input {
            Some(hook) => hook(input),
            None => input.to_string(),
        };
        messages.push(LlmMessage::user(input));
    }

    Ok(messages)
}

fn render_history(
    state: &StateDescriptor,
    entries: &[HistoryEntry],
    view: &ContextView<'_>,
) -> FsmResult<Vec<LlmMessage>> {
    let mut messages = Vec::new();
    for entry in entries {
        let message = match entry.role {
            HistoryRole::Placeholder => {
                messages.extend_from_slice(view.chat_history());
                continue;
            }
            HistoryRole::System => LlmMessage::system(entry.content.render(&state.key, view)?),
            HistoryRole::User => LlmMessage::user(entry.content.render(&state.key, view)?),
            HistoryRole::Assistant => LlmMessage::assistant(entry.content.render(&state.key, view)?),
        };
        messages.push(message);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;
    use crate::state_machine::computed::ComputedValues;
    use crate::state_machine::context::Context;
    use serde_json::json;

    fn context_with_history() -> Context {
        let mut ctx = Context::new();
        ctx.push_message(LlmMessage::user("hi"));
        ctx.push_message(LlmMessage::assistant("hello, how can I help?"));
        ctx.set_user_input(Some("  book a haircut  ".to_string()));
        ctx.set("name", json!("Ana")).unwrap();
        ctx
    }

    fn assemble(state: &StateDescriptor, ctx: &Context) -> FsmResult<Vec<LlmMessage>> {
        let computed = ComputedValues::new(&state.computed);
        assemble_messages(state, &ContextView::new(ctx, &computed))
    }

    fn roles(messages: &[LlmMessage]) -> Vec<MessageRole> {
        messages.iter().map(|m| m.role).collect()
    }

    #[test]
    fn test_default_order_system_history_input() {
        let state = StateDescriptor::builder("s")
            .system_message("You help {name}.")
            .build()
            .unwrap();
        let messages = assemble(&state, &context_with_history()).unwrap();

        assert_eq!(
            roles(&messages),
            vec![MessageRole::System, MessageRole::User, MessageRole::Assistant, MessageRole::User]
        );
        assert_eq!(messages[0].content, "You help Ana.");
        assert_eq!(messages[3].content, "  book a haircut  ");
    }

    #[test]
    fn test_restart_history_drops_persisted_history() {
        let state = StateDescriptor::builder("s").restart_history().build().unwrap();
        let messages = assemble(&state, &context_with_history()).unwrap();
        assert_eq!(roles(&messages), vec![MessageRole::User]);
    }

    #[test]
    fn test_declared_history_with_placeholder() {
        let state = StateDescriptor::builder("s")
            .history(vec![
                HistoryEntry::assistant("Welcome {name}!"),
                HistoryEntry::chat_history(),
                HistoryEntry::user("That's all."),
            ])
            .build()
            .unwrap();
        let messages = assemble(&state, &context_with_history()).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Welcome Ana!", "hi", "hello, how can I help?", "That's all.", "  book a haircut  "]
        );
    }

    #[test]
    fn test_user_template_and_preprocess_hook() {
        let state = StateDescriptor::builder("s")
            .preprocess_input(|text| text.trim().to_uppercase())
            .restart_history()
            .build()
            .unwrap();
        let messages = assemble(&state, &context_with_history()).unwrap();
        assert_eq!(messages[0].content, "BOOK A HAIRCUT");

        let state = StateDescriptor::builder("s")
            .user_input("Customer said: {user_input}")
            .restart_history()
            .build()
            .unwrap();
        let messages = assemble(&state, &context_with_history()).unwrap();
        assert_eq!(messages[0].content, "Customer said:   book a haircut  ");
    }

    #[test]
    fn test_goal_composes_system_message() {
        let goal = GoalPrompt::new("You are a salon assistant helping {name}.")
            .require(["date", "time"])
            .reply("to make an appointment", "ask for a date first.");
        let state = StateDescriptor::builder("s")
            .goal(goal)
            .system_message("Today is Monday.")
            .build()
            .unwrap();
        let messages = assemble(&state, &context_with_history()).unwrap();
        let system = &messages[0].content;

        assert!(system.starts_with("You are a salon assistant helping Ana."));
        assert!(system.contains("- date\n- time"));
        assert!(system.contains("If the user wants to make an appointment: ask for a date first."));
        assert!(system.contains("outside of this scope"));
        assert!(system.ends_with("Today is Monday."));
    }

    #[test]
    fn test_missing_key_fails_without_touching_context() {
        let state = StateDescriptor::builder("appointment")
            .system_message("Book for {appointment_date}")
            .build()
            .unwrap();
        let ctx = context_with_history();
        let before = ctx.clone();
        let err = assemble(&state, &ctx).unwrap_err();
        assert_eq!(err.missing_key(), Some("appointment_date"));
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_no_input_and_no_system_message() {
        let state = StateDescriptor::builder("s").build().unwrap();
        let messages = assemble(&state, &Context::new()).unwrap();
        assert!(messages.is_empty());
    }
}
