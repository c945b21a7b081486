//! Cache State Module
//!
//! Defines the states of the cache state machine and the per-access ticks it
//! produces.

use std::fmt;

// == Visibility ==
/// Whether a value may be handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility<T> {
    /// Freshly fetched; only the fetch's own waiters have seen it
    Private(T),
    /// Eligible for delivery to any consumer
    Public(T),
    /// No payload
    None,
}

impl<T> Visibility<T> {
    pub fn is_public(&self) -> bool {
        matches!(self, Visibility::Public(_))
    }

    /// Returns the payload, regardless of visibility.
    pub fn value(&self) -> Option<&T> {
        match self {
            Visibility::Private(value) | Visibility::Public(value) => Some(value),
            Visibility::None => None,
        }
    }
}

// == Cache State ==
/// The single mutable variable of a cached value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState<T> {
    /// Nothing computed yet
    Empty,
    /// A fetch is in flight
    Calculating,
    /// An invalidation was requested and not yet observed
    Flush,
    /// The last fetch failed, or a flush was observed
    Invalid { should_fetch: bool },
    /// A value is cached
    Holding(Visibility<T>),
}

impl<T> CacheState<T> {
    pub fn is_calculating(&self) -> bool {
        matches!(self, CacheState::Calculating)
    }

    /// Returns the cached value, if this state holds one.
    pub fn value(&self) -> Option<&T> {
        match self {
            CacheState::Holding(visibility) => visibility.value(),
            _ => None,
        }
    }

    /// Short label without the payload, used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Calculating => "calculating",
            CacheState::Flush => "flush",
            CacheState::Invalid { should_fetch: true } => "invalid(should_fetch: true)",
            CacheState::Invalid { should_fetch: false } => "invalid(should_fetch: false)",
            CacheState::Holding(Visibility::Private(_)) => "private stream",
            CacheState::Holding(Visibility::Public(_)) => "public stream",
            CacheState::Holding(Visibility::None) => "stream: none",
        }
    }
}

impl<T: fmt::Debug> fmt::Display for CacheState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheState::Holding(Visibility::Private(value)) => write!(f, "private stream: {value:?}"),
            CacheState::Holding(Visibility::Public(value)) => write!(f, "public stream: {value:?}"),
            other => f.write_str(other.label()),
        }
    }
}
