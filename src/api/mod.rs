//! API Module
//!
//! HTTP handlers and routing for the demo server around a cached quote.
//!
//! # Endpoints
//! - `GET /value` - Cached quote, fetched when missing or due
//! - `POST /refresh` - Fetch a new quote now
//! - `POST /invalidate` - Drop the cached quote
//! - `POST /events` - Publish an external event
//! - `GET /state` - Cache diagnostics
//! - `PUT /remote` - Make the simulated remote fail or recover
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
