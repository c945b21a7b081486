//! Cached Value - an in-process async value cache
//!
//! Provides single-flight fetching, policy-driven refresh and a small HTTP
//! diagnostics surface for the demo server.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheConfig, CachedValue, ExternalEvent, FetchFunction, FetchPriority, RefreshPolicy};
pub use config::Config;
pub use error::FetchError;
