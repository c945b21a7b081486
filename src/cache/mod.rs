//! Cache Module
//!
//! Provides an in-memory cached value with single-flight fetching, a refresh
//! policy and an explicit state machine.

mod fetch;
mod machine;
mod policy;
mod refresh;
mod state;
mod stats;
mod value;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use fetch::{FetchCoordinator, FetchFunction, Fetched, Flight};
pub use machine::{CacheStateMachine, ReadMode};
pub use policy::{CacheConfig, ExternalEvent, FetchPriority, RefreshPolicy};
pub use refresh::{RefreshAction, RefreshControl};
pub use state::{CacheState, Visibility};
pub use stats::CacheStats;
pub use value::CachedValue;
