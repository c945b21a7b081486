//! Refresh Control Module
//!
//! Decides whether a cached value is due for a refetch and carries the control
//! channel used to push flush/refresh actions to the refresh task.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{ExternalEvent, RefreshPolicy};

// == Refresh Action ==
/// Actions delivered over the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshAction {
    /// Invalidate the cached value
    Flush,
    /// Make live consumers re-evaluate the state
    Refresh,
    /// The staleness deadline moved
    Reschedule,
}

#[derive(Debug, Default)]
struct RefreshClock {
    last_success: Option<Instant>,
    last_success_at: Option<DateTime<Utc>>,
    event_pending: bool,
    flush_pending: bool,
}

// == Refresh Control ==
/// Refresh-due bookkeeping for one cached value.
#[derive(Debug)]
pub struct RefreshControl {
    policy: RefreshPolicy,
    clock: Mutex<RefreshClock>,
    actions: mpsc::UnboundedSender<RefreshAction>,
}

impl RefreshControl {
    /// Creates a control and the receiving end of its control channel.
    pub fn new(policy: RefreshPolicy) -> (Self, mpsc::UnboundedReceiver<RefreshAction>) {
        let (actions, receiver) = mpsc::unbounded_channel();
        let control = Self {
            policy,
            clock: Mutex::new(RefreshClock::default()),
            actions,
        };
        (control, receiver)
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    // == Should Refresh ==
    /// Returns true if the value is due for a refetch.
    ///
    /// Due when no fetch has succeeded yet, when `interval` has fully elapsed
    /// since the last success (so a zero interval is always due), or when a
    /// configured event or a forced flush arrived since then.
    pub fn should_refresh(&self) -> bool {
        let clock = self.clock();
        if clock.event_pending || clock.flush_pending {
            return true;
        }
        match clock.last_success {
            None => true,
            Some(at) => at.elapsed() >= self.policy.interval,
        }
    }

    // == Record Success ==
    /// Records a successful fetch completed at `at` and resets pending triggers.
    pub fn record_success(&self, at: Instant) {
        let mut clock = self.clock();
        clock.last_success = Some(at);
        clock.last_success_at = Some(Utc::now());
        clock.event_pending = false;
        clock.flush_pending = false;
        drop(clock);
        let _ = self.actions.send(RefreshAction::Reschedule);
    }

    /// Wall-clock time of the last successful fetch.
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.clock().last_success_at
    }

    /// Instant at which the current value turns stale by age alone.
    ///
    /// `None` when nothing was fetched yet or the interval is zero.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.policy.interval.is_zero() {
            return None;
        }
        self.clock().last_success.map(|at| at + self.policy.interval)
    }

    // == Force Flush ==
    /// Marks the value due and asks the owning state machine to flush it.
    pub fn force_flush(&self) {
        self.clock().flush_pending = true;
        if self.actions.send(RefreshAction::Flush).is_err() {
            debug!("Refresh task gone, flush kept as pending");
        }
    }

    // == Observe Event ==
    /// Feeds an external event; returns true if it made the value due.
    pub fn observe(&self, event: &ExternalEvent) -> bool {
        if !self.policy.triggers_on(event) {
            return false;
        }
        self.clock().event_pending = true;
        if self.actions.send(RefreshAction::Refresh).is_err() {
            debug!(%event, "Refresh task gone, event kept as pending");
        }
        true
    }

    fn clock(&self) -> MutexGuard<'_, RefreshClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn control(interval: Duration) -> RefreshControl {
        RefreshControl::new(RefreshPolicy::periodic_and_login(interval)).0
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_before_first_success() {
        let control = control(Duration::from_secs(10));
        assert!(control.should_refresh());
        assert!(control.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_boundary() {
        let control = control(Duration::from_secs(10));
        control.record_success(Instant::now());
        assert!(!control.should_refresh());

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(!control.should_refresh());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(control.should_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_always_due() {
        let control = control(Duration::ZERO);
        control.record_success(Instant::now());
        assert!(control.should_refresh());
        assert!(control.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_event_makes_due() {
        let (control, mut actions) =
            RefreshControl::new(RefreshPolicy::periodic_and_login(Duration::from_secs(60)));
        control.record_success(Instant::now());

        assert!(!control.observe(&ExternalEvent::EnteredForeground));
        assert!(!control.should_refresh());

        assert!(control.observe(&ExternalEvent::LoggedIn));
        assert!(control.should_refresh());
        assert_eq!(actions.recv().await, Some(RefreshAction::Reschedule));
        assert_eq!(actions.recv().await, Some(RefreshAction::Refresh));

        control.record_success(Instant::now());
        assert!(!control.should_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_flush_sends_action() {
        let (control, mut actions) =
            RefreshControl::new(RefreshPolicy::periodic(Duration::from_secs(60)));
        control.record_success(Instant::now());

        control.force_flush();
        assert!(control.should_refresh());
        assert_eq!(actions.recv().await, Some(RefreshAction::Reschedule));
        assert_eq!(actions.recv().await, Some(RefreshAction::Flush));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_deadline_tracks_last_success() {
        let control = control(Duration::from_secs(5));
        let now = Instant::now();
        control.record_success(now);
        assert_eq!(control.next_deadline(), Some(now + Duration::from_secs(5)));
        assert!(control.last_success_at().is_some());
    }
}
