//! Error types for the Luna service client

use crate::transport::MessageToken;
use std::panic::Location;
use thiserror::Error;

/// Error code used when the bus rejects a request without a more specific code
pub const BUS_ERROR_GENERIC: i32 = -1;

/// Structured error reported by the bus library
///
/// Mirrors what a bus implementation knows about a failure: a numeric code,
/// a message and where the failure was raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code} : {message}({function} @ {file}:{line})")]
pub struct BusError {
    pub code: i32,
    pub message: String,
    pub function: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl BusError {
    /// Create an error attributed to the caller's source location
    #[track_caller]
    pub fn new(code: i32, message: impl Into<String>, function: &'static str) -> Self {
        let location = Location::caller();
        Self {
            code,
            message: message.into(),
            function,
            file: location.file(),
            line: location.line(),
        }
    }
}

/// Errors surfaced by [`ServiceBusClient`](crate::ServiceBusClient) operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The client holds no bus connection
    #[error("Service is not registered")]
    NotRegistered,

    /// The bus refused to register the service name
    #[error("Fail to register to LS2: {0}")]
    Registration(BusError),

    /// The connection could not be attached to the event loop
    #[error("Fail to attach a service to a mainloop: {0}")]
    Attach(BusError),

    /// The bus rejected a call or subscription synchronously
    #[error("Call to {uri} rejected: {source}")]
    Submission {
        uri: String,
        #[source]
        source: BusError,
    },

    /// The bus could not confirm cancellation of a subscription
    #[error("Cancel of token {token} failed: {source}")]
    Cancellation {
        token: MessageToken,
        #[source]
        source: BusError,
    },

    /// The bus reported a failure while unregistering
    #[error("Fail to unregister service: {0}")]
    Unregister(BusError),
}

impl ClientError {
    /// The underlying bus error, if the failure came from the bus
    pub fn bus_error(&self) -> Option<&BusError> {
        match self {
            ClientError::NotRegistered => None,
            ClientError::Registration(e) | ClientError::Attach(e) | ClientError::Unregister(e) => {
                Some(e)
            }
            ClientError::Submission { source, .. } | ClientError::Cancellation { source, .. } => {
                Some(source)
            }
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
