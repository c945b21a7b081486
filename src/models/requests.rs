//! Request DTOs for the demo server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::cache::ExternalEvent;

/// Request body for publishing an external event (POST /events)
///
/// # Fields
/// - `event`: Event name, e.g. `login` or `foreground`
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    pub event: String,
}

impl EventRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.event.trim().is_empty() {
            return Some("Event name cannot be empty".to_string());
        }
        None
    }

    pub fn to_event(&self) -> ExternalEvent {
        match self.event.trim().parse() {
            Ok(event) => event,
            Err(never) => match never {},
        }
    }
}

/// Request body for switching the simulated remote (PUT /remote)
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRequest {
    /// Whether following fetches should fail
    pub failing: bool,
}
