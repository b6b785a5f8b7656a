//! The salon state graph

use super::store::{Appointment, BookingStore};
use super::tools::{self, Intent};
use super::{BEGIN_SENTENCE, GENERIC_GOAL};
use crate::llm::{LlmMessage, LlmService, ToolCall};
use crate::runtime::{MachineConfig, StateMachine};
use crate::state_machine::{
    AllowedTransitions, ConditionalSelector, ContextView, FsmError, FsmResult, GoalPrompt,
    MachineDefaults, StateDescriptor, StateRegistry, Template, Transition, CHAT_HISTORY_KEY,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const GENERAL_INQUIRIES: &str = "general_inquiries";
pub const APPOINTMENT: &str = "appointment";
pub const APPOINTMENT_CONFIRM: &str = "appointment_confirm";
pub const INFORMATION_INQUIRY: &str = "information_inquiry";

const APPOINTMENT_DATE: &str = "appointment_date";
const APPOINTMENT_TIME: &str = "appointment_time";
const CUSTOMER_NAME: &str = "customer_name";
const CUSTOMER_PHONE: &str = "customer_phone";
const CUSTOMER_EMAIL: &str = "customer_email";
const APPOINTMENT_CONFIRMED: &str = "appointment_confirmed";
const APPOINTMENT_BOOKED: &str = "appointment_booked";
const AVAILABLE_SLOTS: &str = "available_slots";

const REQUIRED_FIELDS: [&str; 4] = [APPOINTMENT_DATE, APPOINTMENT_TIME, CUSTOMER_NAME, CUSTOMER_PHONE];

/// Register the four salon states
pub fn build_registry(store: &Arc<BookingStore>) -> FsmResult<StateRegistry> {
    let mut registry = StateRegistry::new();
    registry.register(general_inquiries()?)?;
    registry.register(appointment(store)?)?;
    registry.register(appointment_confirm(store)?)?;
    registry.register(information_inquiry()?)?;
    Ok(registry)
}

pub fn machine_config(defaults: MachineDefaults) -> MachineConfig {
    let table = AllowedTransitions::new()
        .allow(GENERAL_INQUIRIES, [APPOINTMENT, INFORMATION_INQUIRY])
        .allow(APPOINTMENT, [APPOINTMENT_CONFIRM])
        .allow(APPOINTMENT_CONFIRM, [APPOINTMENT, INFORMATION_INQUIRY])
        .allow(INFORMATION_INQUIRY, [APPOINTMENT]);

    MachineConfig::new(GENERAL_INQUIRIES)
        .with_defaults(defaults.with_common_tools(tools::common_tools()))
        .with_allowed_transitions(table)
}

pub fn build_machine(
    store: &Arc<BookingStore>,
    gateway: Arc<dyn LlmService>,
    defaults: MachineDefaults,
) -> FsmResult<StateMachine> {
    let registry = Arc::new(build_registry(store)?);
    StateMachine::new(registry, gateway, machine_config(defaults))
}

/// Seed the history with the opening line and return it
pub fn greet(machine: &mut StateMachine) -> FsmResult<&'static str> {
    let history = serde_json::to_value([LlmMessage::assistant(BEGIN_SENTENCE)])
        .map_err(|e| FsmError::Configuration(e.to_string()))?;
    machine.set_context_value(CHAT_HISTORY_KEY, history)?;
    Ok(BEGIN_SENTENCE)
}

fn detected_intent(view: &ContextView<'_>) -> Option<Intent> {
    view.tool_arguments(tools::DETECT_USER_INTENT)
        .and_then(Intent::from_arguments)
}

fn wants_booking(view: &ContextView<'_>) -> bool {
    detected_intent(view).is_some_and(Intent::wants_booking)
}

fn hung_up(view: &ContextView<'_>) -> bool {
    view.tool_fired(tools::END_CALL)
}

fn general_inquiries() -> FsmResult<StateDescriptor> {
    StateDescriptor::builder(GENERAL_INQUIRIES)
        .goal(GoalPrompt::new(GENERIC_GOAL).reply(
            "to make an appointment",
            "ask first for the date that best suits them.",
        ))
        .tool(tools::detect_user_intent())
        .conditions(
            ConditionalSelector::new()
                .when(Transition::Terminate, hung_up)
                .when_state(APPOINTMENT, wants_booking)
                .when_state(INFORMATION_INQUIRY, |v| {
                    detected_intent(v) == Some(Intent::InformationInquiry)
                })
                .when(Transition::Stay, |_| true),
        )
        .build()
}

fn appointment(store: &Arc<BookingStore>) -> FsmResult<StateDescriptor> {
    let prompt_store = Arc::clone(store);
    let slot_store = Arc::clone(store);

    StateDescriptor::builder(APPOINTMENT)
        .goal(GoalPrompt::new(GENERIC_GOAL).require([
            "the appointment date",
            "the appointment time",
            "the customer's name",
            "the customer's phone number (email is optional)",
        ]))
        .system_message(Template::computed(move |view| {
            Ok(appointment_instructions(&prompt_store, view))
        }))
        .tools([tools::check_availability(), tools::collect_contact_information()])
        .process_tool_call(|call, _| Ok(appointment_variables(call)))
        .computed(AVAILABLE_SLOTS, move |ctx| {
            json!(slot_store.check_availability(ctx.get_str(APPOINTMENT_DATE).unwrap_or_default()))
        })
        .conditions(
            ConditionalSelector::new()
                .when(Transition::Terminate, hung_up)
                .when_state(APPOINTMENT_CONFIRM, ready_to_confirm)
                .when(Transition::Stay, |_| true),
        )
        .build()
}

fn appointment_instructions(store: &BookingStore, view: &ContextView<'_>) -> String {
    let mut lines = Vec::new();

    match view.get_str(APPOINTMENT_DATE) {
        None => {
            let today = chrono::Local::now().date_naive();
            lines.push(format!(
                "Ask the user to select a date for the appointment. Today is {today}."
            ));
        }
        Some(date) => {
            let slots = store.check_availability(date);
            if slots.is_empty() {
                lines.push(format!(
                    "Tell the user there is no available time slot on {date} and ask for a different date."
                ));
            } else {
                let numbered: Vec<String> = slots
                    .iter()
                    .enumerate()
                    .map(|(i, slot)| format!("{}. {slot}", i + 1))
                    .collect();
                lines.push(format!(
                    "Ask the user to select one of the available time slots on {date}:\n{}",
                    numbered.join("\n")
                ));
            }
        }
    }

    if !view.has_all(&[CUSTOMER_NAME, CUSTOMER_PHONE]) {
        lines.push(
            "Ask for the contact information needed for the appointment: name, phone number and optionally email."
                .to_string(),
        );
    }
    lines.join("\n")
}

/// Map booking tool arguments onto context names
fn appointment_variables(call: &ToolCall) -> Map<String, Value> {
    let args = call.arguments.as_object().cloned().unwrap_or_default();
    if call.name != tools::CHECK_AVAILABILITY && call.name != tools::COLLECT_CONTACT_INFORMATION {
        return args;
    }

    args
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let key = match key.as_str() {
                "date" => APPOINTMENT_DATE.to_string(),
                "time" => APPOINTMENT_TIME.to_string(),
                _ => key,
            };
            (key, value)
        })
        .collect()
}

fn ready_to_confirm(view: &ContextView<'_>) -> bool {
    if !view.has_all(&REQUIRED_FIELDS) {
        return false;
    }
    let (Some(time), Ok(slots)) = (view.get_str(APPOINTMENT_TIME), view.computed(AVAILABLE_SLOTS)) else {
        return false;
    };
    slots
        .as_array()
        .is_some_and(|slots| slots.iter().any(|s| s.as_str() == Some(time)))
}

fn appointment_confirm(store: &Arc<BookingStore>) -> FsmResult<StateDescriptor> {
    let store = Arc::clone(store);

    StateDescriptor::builder(APPOINTMENT_CONFIRM)
        .goal(GoalPrompt::new(GENERIC_GOAL))
        .system_message(
            "Confirm the appointment with the user: {appointment_date} at {appointment_time} \
for {customer_name}, phone {customer_phone}. Ask whether every detail is correct.",
        )
        .tool(tools::appointment_confirmation())
        .process_tool_call(move |call, view| confirm_booking(&store, call, view))
        .conditions(
            ConditionalSelector::new()
                .when(Transition::Terminate, hung_up)
                .when_state(INFORMATION_INQUIRY, |v| {
                    v.tool_fired(tools::APPOINTMENT_CONFIRMATION)
                        && v.get_bool(APPOINTMENT_BOOKED) == Some(true)
                })
                .when_state(APPOINTMENT, |v| v.tool_fired(tools::APPOINTMENT_CONFIRMATION))
                .when(Transition::Stay, |_| true),
        )
        .build()
}

/// Commit the booking when the user confirmed it
fn confirm_booking(
    store: &BookingStore,
    call: &ToolCall,
    view: &ContextView<'_>,
) -> FsmResult<Map<String, Value>> {
    let mut vars = call.arguments.as_object().cloned().unwrap_or_default();
    if call.name != tools::APPOINTMENT_CONFIRMATION {
        return Ok(vars);
    }

    let confirmed = vars
        .get(APPOINTMENT_CONFIRMED)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let booked = confirmed && store.schedule_appointment(appointment_from(view)?);
    if confirmed && !booked {
        tracing::warn!("Confirmed slot is no longer available");
    }

    vars.insert(APPOINTMENT_CONFIRMED.to_string(), json!(confirmed));
    vars.insert(APPOINTMENT_BOOKED.to_string(), json!(booked));
    Ok(vars)
}

fn appointment_from(view: &ContextView<'_>) -> FsmResult<Appointment> {
    let field = |key: &str| {
        view.get_str(key)
            .map(str::to_string)
            .ok_or_else(|| FsmError::Validation(format!("cannot book without '{key}'")))
    };
    Ok(Appointment {
        date: field(APPOINTMENT_DATE)?,
        time: field(APPOINTMENT_TIME)?,
        customer_name: field(CUSTOMER_NAME)?,
        customer_phone: field(CUSTOMER_PHONE)?,
        customer_email: view.get_str(CUSTOMER_EMAIL).map(str::to_string),
    })
}

fn information_inquiry() -> FsmResult<StateDescriptor> {
    StateDescriptor::builder(INFORMATION_INQUIRY)
        .goal(GoalPrompt::new(GENERIC_GOAL))
        .system_message(Template::computed(|view| {
            Ok(if view.get_bool(APPOINTMENT_BOOKED) == Some(true) {
                format!(
                    "The appointment on {} at {} is booked. Answer any further questions about the salon.",
                    view.get_str(APPOINTMENT_DATE).unwrap_or_default(),
                    view.get_str(APPOINTMENT_TIME).unwrap_or_default(),
                )
            } else {
                "Answer the user's questions about services, pricing and opening hours.".to_string()
            })
        }))
        .conditions(
            ConditionalSelector::new()
                .when(Transition::Terminate, hung_up)
                .when_state(APPOINTMENT, wants_booking)
                .when(Transition::Stay, |_| true),
        )
        .build()
}
