//! The run loop
//!
//! A `StateMachine` owns one conversation: its context, current state and
//! transition log. Descriptors come from a shared registry. Each turn is
//! staged on a copy of the context and committed only after the gateway call,
//! response processing and transition validation all succeed.

use crate::llm::{LlmMessage, LlmService};
use crate::state_machine::{
    execute_turn, resolve_next_state, AllowedTransitions, Context, FsmError, FsmResult,
    MachineDefaults, StateDescriptor, StateRegistry, Transition, TransitionRecord,
};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const DEFAULT_TERMINAL_STATE: &str = "end";

pub type CompletionHook = Arc<dyn Fn(&Context) + Send + Sync>;

/// Static shape of a machine
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub initial_state: String,
    pub terminal_state: String,
    pub defaults: MachineDefaults,
    /// Opt-in table of explicit successors per state
    pub allowed_transitions: Option<AllowedTransitions>,
}

impl MachineConfig {
    pub fn new(initial_state: impl Into<String>) -> Self {
        Self {
            initial_state: initial_state.into(),
            terminal_state: DEFAULT_TERMINAL_STATE.to_string(),
            defaults: MachineDefaults::default(),
            allowed_transitions: None,
        }
    }

    #[must_use]
    pub fn with_terminal_state(mut self, state: impl Into<String>) -> Self {
        self.terminal_state = state.into();
        self
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: MachineDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_allowed_transitions(mut self, table: AllowedTransitions) -> Self {
        self.allowed_transitions = Some(table);
        self
    }
}

/// Per-run limits
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Maximum turns; the machine default when unset
    pub step_budget: Option<usize>,
    /// Stop once this state is about to run
    pub stop_before_state: Option<String>,
}

impl RunOptions {
    pub fn steps(budget: usize) -> Self {
        Self {
            step_budget: Some(budget),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stop_before(mut self, state: impl Into<String>) -> Self {
        self.stop_before_state = Some(state.into());
        self
    }
}

/// Snapshot returned by [`StateMachine::run`]
#[derive(Debug, Clone)]
pub struct RunResult {
    pub steps: usize,
    pub state: String,
    pub context: Context,
    pub completed: bool,
}

impl RunResult {
    /// The answer entry a relay reads back
    pub fn answer(&self, output_var: &str) -> Option<&str> {
        self.context.get_str(output_var)
    }
}

pub struct StateMachine {
    conversation_id: String,
    registry: Arc<StateRegistry>,
    gateway: Arc<dyn LlmService>,
    config: MachineConfig,
    current: String,
    context: Context,
    log: Vec<TransitionRecord>,
    on_complete: Option<CompletionHook>,
}

impl StateMachine {
    /// # Errors
    ///
    /// `FsmError::Configuration` when the initial or terminal state is
    /// unnamed, when they coincide, or when the terminal state is registered.
    pub fn new(
        registry: Arc<StateRegistry>,
        gateway: Arc<dyn LlmService>,
        config: MachineConfig,
    ) -> FsmResult<Self> {
        if config.initial_state.is_empty() || config.terminal_state.is_empty() {
            return Err(FsmError::Configuration(
                "initial and terminal states must be named".to_string(),
            ));
        }
        if config.initial_state == config.terminal_state {
            return Err(FsmError::Configuration(format!(
                "initial state '{}' cannot be the terminal state",
                config.initial_state
            )));
        }
        if registry.contains(&config.terminal_state) {
            return Err(FsmError::Configuration(format!(
                "terminal state '{}' must not be registered",
                config.terminal_state
            )));
        }

        Ok(Self {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            current: config.initial_state.clone(),
            registry,
            gateway,
            config,
            context: Context::new(),
            log: Vec::new(),
            on_complete: None,
        })
    }

    /// Called with the context whenever the terminal state is reached
    #[must_use]
    pub fn with_on_complete(mut self, hook: impl Fn(&Context) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Add a state to this machine. A registry shared with other machines is
    /// copied first, so they do not see the new state.
    ///
    /// # Errors
    ///
    /// `FsmError::Configuration` for the terminal key or a duplicate key.
    pub fn register_state(&mut self, descriptor: StateDescriptor) -> FsmResult<()> {
        if descriptor.key() == self.config.terminal_state {
            return Err(FsmError::Configuration(format!(
                "'{}' is the terminal state",
                descriptor.key()
            )));
        }
        Arc::make_mut(&mut self.registry).register(descriptor)?;
        Ok(())
    }

    /// Feed one user input and run turns until a stop condition is met.
    ///
    /// Only the first turn sees the input. A `Stay` decision ends the run,
    /// since the state waits for the next input.
    ///
    /// # Errors
    ///
    /// Any [`FsmError`] raised by a turn, unmodified. Turns committed earlier
    /// in the same run are kept; the failing turn itself leaves no trace.
    #[tracing::instrument(skip_all, fields(conv_id = %self.conversation_id))]
    pub async fn run(
        &mut self,
        user_input: impl Into<String>,
        options: RunOptions,
    ) -> FsmResult<RunResult> {
        let mut pending_input = Some(user_input.into());
        let budget = options.step_budget.unwrap_or(self.config.defaults.step_budget);
        let mut steps = 0;

        if self.is_completed() {
            tracing::warn!(state = %self.current, "Run requested on a completed conversation");
        }

        while steps < budget && !self.is_completed() {
            if options.stop_before_state.as_deref() == Some(self.current.as_str()) {
                tracing::debug!(state = %self.current, "Stopping before guarded state");
                break;
            }

            let state = self.registry.lookup(&self.current)?;
            let mut base = self.context.clone();
            base.set_user_input(pending_input.take());

            let outcome =
                match execute_turn(&state, base, self.gateway.as_ref(), &self.config.defaults).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(state = %self.current, error = %e, "Turn failed, context unchanged");
                        return Err(e);
                    }
                };

            let stayed = outcome.transition == Transition::Stay;
            let next = resolve_next_state(
                self.config.allowed_transitions.as_ref(),
                &self.current,
                outcome.transition,
                &self.config.terminal_state,
            )?;
            if next != self.config.terminal_state && !self.registry.contains(&next) {
                return Err(FsmError::UnknownState(next));
            }

            self.context = outcome.context;
            self.log.push(TransitionRecord {
                from: self.current.clone(),
                to: next.clone(),
            });
            steps += 1;
            tracing::info!(
                state = %self.current,
                next_state = %next,
                step = steps,
                "Transition committed"
            );
            self.current = next;

            if self.is_completed() {
                tracing::info!("Conversation reached terminal state");
                if let Some(hook) = &self.on_complete {
                    hook(&self.context);
                }
            }
            if stayed {
                tracing::debug!(state = %self.current, "Waiting for more input");
                break;
            }
        }

        Ok(RunResult {
            steps,
            state: self.current.clone(),
            context: self.context.clone(),
            completed: self.is_completed(),
        })
    }

    /// Clear the context and log and return to the initial state
    pub fn reset(&mut self) {
        tracing::info!(conv_id = %self.conversation_id, "Resetting conversation");
        self.context.clear();
        self.log.clear();
        self.current = self.config.initial_state.clone();
    }

    /// Any context entry, reserved ones included
    pub fn get_context_value(&self, key: &str) -> Option<Value> {
        self.context.lookup(key)
    }

    pub fn set_context_value(&mut self, key: impl Into<String>, value: Value) -> FsmResult<()> {
        self.context.set(key, value)
    }

    pub fn merge_context(&mut self, values: Map<String, Value>) -> FsmResult<()> {
        self.context.merge(values)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn chat_history(&self) -> &[LlmMessage] {
        self.context.chat_history()
    }

    pub fn current_state(&self) -> &str {
        &self.current
    }

    pub fn initial_state(&self) -> &str {
        &self.config.initial_state
    }

    pub fn terminal_state(&self) -> &str {
        &self.config.terminal_state
    }

    pub fn is_completed(&self) -> bool {
        self.current == self.config.terminal_state
    }

    pub fn transition_log(&self) -> &[TransitionRecord] {
        &self.log
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }
}
