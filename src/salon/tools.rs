//! Tool declarations offered to the model

use crate::llm::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const END_CALL: &str = "end_call";
pub const DETECT_USER_INTENT: &str = "detect_user_intent";
pub const CHECK_AVAILABILITY: &str = "check_availability";
pub const COLLECT_CONTACT_INFORMATION: &str = "collect_contact_information";
pub const APPOINTMENT_CONFIRMATION: &str = "appointment_confirmation";

/// What the customer is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Appointment,
    AppointmentDateAvailability,
    AppointmentProvidingInformation,
    AppointmentConfirmation,
    InformationInquiry,
    ServiceComplain,
    Thanks,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Intent::Appointment,
        Intent::AppointmentDateAvailability,
        Intent::AppointmentProvidingInformation,
        Intent::AppointmentConfirmation,
        Intent::InformationInquiry,
        Intent::ServiceComplain,
        Intent::Thanks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Appointment => "appointment",
            Intent::AppointmentDateAvailability => "appointment_date_availability",
            Intent::AppointmentProvidingInformation => "appointment_providing_information",
            Intent::AppointmentConfirmation => "appointment_confirmation",
            Intent::InformationInquiry => "information_inquiry",
            Intent::ServiceComplain => "service_complain",
            Intent::Thanks => "thanks",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Intent::Appointment => "the user wants to make an appointment",
            Intent::AppointmentDateAvailability => "the user wants an appointment for a specific date",
            Intent::AppointmentProvidingInformation => "the user is providing contact information",
            Intent::AppointmentConfirmation => "the user confirms the appointment details",
            Intent::InformationInquiry => "the user wants information about the services",
            Intent::ServiceComplain => "the user is complaining",
            Intent::Thanks => "the user is expressing satisfaction with the service",
        }
    }

    /// Intents that should move the conversation into booking
    pub fn wants_booking(self) -> bool {
        matches!(
            self,
            Intent::Appointment
                | Intent::AppointmentDateAvailability
                | Intent::AppointmentProvidingInformation
        )
    }

    /// Intent carried by `detect_user_intent` arguments
    pub fn from_arguments(arguments: &Value) -> Option<Self> {
        serde_json::from_value(arguments.get("intention")?.clone()).ok()
    }
}

pub fn end_call() -> ToolDefinition {
    ToolDefinition::new(
        END_CALL,
        "End the call only when the user explicitly asks for it.",
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "What you say to the customer before ending the call."
                }
            },
            "required": ["message"]
        }),
    )
}

pub fn detect_user_intent() -> ToolDefinition {
    let options: Vec<String> = Intent::ALL
        .iter()
        .map(|i| format!("- {}: {}", i.as_str(), i.describe()))
        .collect();
    let names: Vec<&str> = Intent::ALL.iter().map(|i| i.as_str()).collect();

    ToolDefinition::new(
        DETECT_USER_INTENT,
        format!(
            "Select the user's intent from the conversation, if it is one of:\n{}",
            options.join("\n")
        ),
        json!({
            "type": "object",
            "properties": {
                "intention": {
                    "type": "string",
                    "description": "The intention of the user.",
                    "enum": names
                }
            },
            "required": ["intention"]
        }),
    )
}

pub fn check_availability() -> ToolDefinition {
    ToolDefinition::new(
        CHECK_AVAILABILITY,
        "Check available time slots for a given date.",
        json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "The date to check, in YYYY-MM-DD format."
                }
            },
            "required": ["date"]
        }),
    )
}

pub fn collect_contact_information() -> ToolDefinition {
    ToolDefinition::new(
        COLLECT_CONTACT_INFORMATION,
        "Record the appointment details the user has given so far: time slot, name, phone and optionally email.",
        json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "description": "Appointment date, YYYY-MM-DD." },
                "time": { "type": "string", "description": "Appointment time, HH:MM." },
                "customer_name": { "type": "string", "description": "Name of the customer." },
                "customer_phone": { "type": "string", "description": "Phone number of the customer." },
                "customer_email": { "type": "string", "description": "Email of the customer." }
            }
        }),
    )
}

pub fn appointment_confirmation() -> ToolDefinition {
    ToolDefinition::new(
        APPOINTMENT_CONFIRMATION,
        "The user answered whether the appointment date, time and contact information are correct.",
        json!({
            "type": "object",
            "properties": {
                "appointment_confirmed": {
                    "type": "boolean",
                    "description": "True when the user confirmed every detail."
                },
                "answer": { "type": "string", "description": "Message to answer to the user." }
            },
            "required": ["appointment_confirmed"]
        }),
    )
}

/// Tools offered in every state
pub fn common_tools() -> Vec<ToolDefinition> {
    vec![end_call(), detect_user_intent()]
}
