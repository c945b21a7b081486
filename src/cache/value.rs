//! Cached Value Module
//!
//! The public handle consumers hold: one state machine, one refresh control
//! and the background task driving them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{
    CacheConfig, CacheStateMachine, CacheStats, ExternalEvent, FetchCoordinator, FetchFunction,
    ReadMode, RefreshControl,
};
use crate::error::{FetchError, Result};
use crate::tasks::spawn_refresh_task;

// == Cached Value ==
/// An in-memory value that is fetched on demand, shared by every concurrent
/// reader, and refetched according to its [`CacheConfig`].
///
/// Must be created inside a Tokio runtime. Dropping it stops the refresh
/// task; fetches already running still complete for their waiters.
///
/// # Example
/// ```ignore
/// let balance = CachedValue::new(CacheConfig::new(RefreshPolicy::periodic_and_login(
///     Duration::from_secs(10),
/// )));
/// balance.bind(FetchFunction::one_shot_weak(&client, |client| async move {
///     client.fetch_balance().await
/// }))?;
/// let current = balance.value().await?;
/// ```
pub struct CachedValue<T> {
    machine: CacheStateMachine<T>,
    control: Arc<RefreshControl>,
    refresh_task: JoinHandle<()>,
}

impl<T> CachedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a cached value without an external event feed.
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a cached value that listens to `events` for refresh triggers.
    pub fn with_events(config: CacheConfig, events: broadcast::Receiver<ExternalEvent>) -> Self {
        Self::build(config, Some(events))
    }

    fn build(config: CacheConfig, events: Option<broadcast::Receiver<ExternalEvent>>) -> Self {
        let (control, actions) = RefreshControl::new(config.policy);
        let control = Arc::new(control);
        let machine = CacheStateMachine::new(
            Arc::clone(&control),
            FetchCoordinator::new(config.fetch_priority),
        );
        let refresh_task =
            spawn_refresh_task(machine.clone(), Arc::clone(&control), actions, events);

        Self {
            machine,
            control,
            refresh_task,
        }
    }

    // == Bind ==
    /// Binds the fetch function. Fails with `InternalError` once a fetch has
    /// been attempted.
    pub fn bind(&self, function: FetchFunction<T>) -> Result<()> {
        self.machine.bind(function)
    }

    // == Value ==
    /// Returns the cached value, fetching it first if it is missing or due.
    /// Waits on a fetch already in flight instead of starting another.
    pub async fn value(&self) -> Result<T> {
        self.machine
            .current_or_fetch(ReadMode::OneShot)
            .next()
            .await
            .unwrap_or_else(|| {
                Err(FetchError::InternalError(
                    "one-shot read ended without a value".to_string(),
                ))
            })
    }

    // == Stream ==
    /// Streams the value now and after every refresh. Ends after an error.
    pub fn stream(&self) -> BoxStream<'static, Result<T>> {
        self.machine.current_or_fetch(ReadMode::Live)
    }

    // == Refresh ==
    /// Fetches now, regardless of the refresh policy.
    pub async fn refresh(&self) -> Result<T> {
        self.machine.force_fetch().await
    }

    /// Fetches now and keeps streaming every value stored afterwards, which
    /// for a continuous fetch function means each value it produces.
    pub fn fetch_stream(&self) -> BoxStream<'static, Result<T>> {
        self.machine.fetch_stream()
    }

    // == Invalidate ==
    /// Discards the cached value. The next read fetches again.
    pub fn invalidate(&self) {
        self.machine.invalidate();
    }

    /// The currently cached value, without fetching or checking freshness.
    pub fn peek(&self) -> Option<T> {
        self.machine.peek()
    }

    /// The refresh control, for collaborators that need to force a flush.
    pub fn control(&self) -> Arc<RefreshControl> {
        Arc::clone(&self.control)
    }

    pub fn stats(&self) -> CacheStats {
        self.machine.stats()
    }

    /// Wall-clock time of the last successful fetch.
    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.control.last_success_at()
    }
}

impl<T> CachedValue<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Point-in-time state description, for logs only.
    pub fn debug_state(&self) -> String {
        self.machine.debug_state()
    }

    /// Stream of state descriptions, for logs only.
    pub fn states(&self) -> BoxStream<'static, String> {
        self.machine.states()
    }
}

impl<T> Drop for CachedValue<T> {
    fn drop(&mut self) {
        self.refresh_task.abort();
        debug!("Cached value dropped, refresh task aborted");
    }
}
