//! Standard reply payloads
//!
//! Payloads are opaque strings to the client. Services on the bus
//! conventionally answer with a JSON object carrying `returnValue`, and
//! errors raised by the bus itself use the same shape.

use serde::{Deserialize, Serialize};

/// Error code the bus uses for unknown services and methods
pub const ERROR_CODE_UNKNOWN: i32 = -1;

/// Common fields of a bus reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusReply {
    pub return_value: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<bool>,
}

impl BusReply {
    pub fn success() -> Self {
        Self {
            return_value: true,
            error_code: None,
            error_text: None,
            subscribed: None,
        }
    }

    pub fn error(code: i32, text: impl Into<String>) -> Self {
        Self {
            return_value: false,
            error_code: Some(code),
            error_text: Some(text.into()),
            subscribed: None,
        }
    }

    /// Reply sent when the target service is not on the bus
    pub fn service_missing(service: &str) -> Self {
        Self::error(
            ERROR_CODE_UNKNOWN,
            format!("Service does not exist: {}.", service),
        )
    }

    /// Reply sent when the service exists but lacks the method
    pub fn method_missing(method: &str, service: &str) -> Self {
        Self::error(
            ERROR_CODE_UNKNOWN,
            format!("Unknown method \"{}\" for service \"{}\"", method, service),
        )
    }

    /// Parse the common fields out of a payload; `None` for non-JSON or empty payloads
    pub fn parse(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }

    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"returnValue\":false}"))
    }
}
