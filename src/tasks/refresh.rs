//! Refresh Task
//!
//! Background task owning the timer and control channel of one cached value.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CacheStateMachine, ExternalEvent, RefreshAction, RefreshControl};

/// Spawns the task that turns refresh signals into state machine actions.
///
/// The task loops forever, reacting to:
/// - control-channel actions (`Flush` invalidates, `Refresh` wakes readers,
///   `Reschedule` recomputes the deadline)
/// - external events, which mark the value due when the policy lists them
/// - the staleness deadline of the current value, which wakes live readers
///   so they refetch
///
/// # Arguments
/// * `machine` - State machine of the cached value
/// * `control` - Refresh control shared with the machine
/// * `actions` - Receiving end of the control channel
/// * `events` - Optional external event feed
///
/// # Returns
/// A JoinHandle for the spawned task. The owning `CachedValue` aborts it
/// when dropped.
pub fn spawn_refresh_task<T>(
    machine: CacheStateMachine<T>,
    control: Arc<RefreshControl>,
    mut actions: mpsc::UnboundedReceiver<RefreshAction>,
    mut events: Option<broadcast::Receiver<ExternalEvent>>,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(
            "Starting refresh task with interval of {:?}",
            control.policy().interval
        );

        let mut woken_for: Option<Instant> = None;

        loop {
            let deadline = control
                .next_deadline()
                .filter(|deadline| woken_for != Some(*deadline));

            tokio::select! {
                action = actions.recv() => match action {
                    Some(RefreshAction::Flush) => {
                        debug!("Flush requested through refresh control");
                        machine.invalidate();
                    }
                    Some(RefreshAction::Refresh) => machine.poke(),
                    Some(RefreshAction::Reschedule) => {}
                    None => break,
                },
                event = next_event(&mut events) => match event {
                    Ok(event) => {
                        if control.observe(&event) {
                            debug!(%event, "External event made the value due");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Refresh task lagged behind, {} events skipped", skipped);
                        machine.poke();
                    }
                    Err(RecvError::Closed) => {
                        debug!("External event feed closed");
                        events = None;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debug!("Cached value reached its refresh interval");
                    woken_for = deadline;
                    machine.poke();
                }
            }
        }

        debug!("Refresh control dropped, refresh task exiting");
    })
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ExternalEvent>>,
) -> Result<ExternalEvent, RecvError> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
