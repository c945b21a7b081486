//! Refresh Policy Module
//!
//! Plain configuration describing when a cached value goes stale and how
//! bursts of fetch requests are coalesced.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// == External Event ==
/// A discrete signal from outside the cache that may force revalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExternalEvent {
    /// The user logged in (session changed)
    LoggedIn,
    /// The application came back to the foreground
    EnteredForeground,
    /// Any other named signal
    Custom(String),
}

impl FromStr for ExternalEvent {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "login" | "logged_in" => ExternalEvent::LoggedIn,
            "foreground" | "entered_foreground" => ExternalEvent::EnteredForeground,
            other => ExternalEvent::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for ExternalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalEvent::LoggedIn => f.write_str("login"),
            ExternalEvent::EnteredForeground => f.write_str("foreground"),
            ExternalEvent::Custom(name) => f.write_str(name),
        }
    }
}

// == Refresh Policy ==
/// When a cached value should be refetched.
///
/// An `interval` of zero means the value is due on every access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Maximum age of a value before it is refetched
    pub interval: Duration,
    /// External events that also make the value due
    pub also_on: HashSet<ExternalEvent>,
}

impl RefreshPolicy {
    /// Creates a policy with an explicit interval and event set.
    pub fn new(interval: Duration, also_on: impl IntoIterator<Item = ExternalEvent>) -> Self {
        Self {
            interval,
            also_on: also_on.into_iter().collect(),
        }
    }

    /// Time-based refresh only.
    pub fn periodic(interval: Duration) -> Self {
        Self::new(interval, [])
    }

    /// Time-based refresh, plus a refresh whenever the user logs in.
    pub fn periodic_and_login(interval: Duration) -> Self {
        Self::new(interval, [ExternalEvent::LoggedIn])
    }

    /// Returns true if `event` is one of the configured triggers.
    pub fn triggers_on(&self, event: &ExternalEvent) -> bool {
        self.also_on.contains(event)
    }
}

// == Fetch Priority ==
/// How "should fetch" signals are turned into fetch invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPriority {
    /// Every due signal may start an attempt; only concurrency coalesces.
    #[default]
    FetchAll,
    /// Each attempt is delayed by the window; signals arriving meanwhile
    /// join the same attempt.
    Throttled(Duration),
}

// == Cache Config ==
/// Full configuration of one cached value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub policy: RefreshPolicy,
    pub fetch_priority: FetchPriority,
}

impl CacheConfig {
    /// Creates a config with the default `FetchAll` priority.
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            fetch_priority: FetchPriority::FetchAll,
        }
    }

    /// Replaces the fetch priority.
    pub fn with_fetch_priority(mut self, fetch_priority: FetchPriority) -> Self {
        self.fetch_priority = fetch_priority;
        self
    }
}
