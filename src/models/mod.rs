//! Request and Response models for the demo server API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{EventRequest, RemoteRequest};
pub use responses::{
    AckResponse, ErrorResponse, HealthResponse, StateResponse, StatsResponse, ValueResponse,
};
