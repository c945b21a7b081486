//! Background Tasks Module
//!
//! Contains the background task that drives a cached value's refresh policy.
//!
//! # Tasks
//! - Refresh: applies control-channel actions, listens for external events and
//!   wakes live readers when the cached value ages past its interval

mod refresh;

pub use refresh::spawn_refresh_task;
