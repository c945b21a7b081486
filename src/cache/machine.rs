//! Cache State Machine Module
//!
//! The only owner of [`CacheState`]. All transitions run inside the critical
//! section of a `watch` channel, which both serializes them and multicasts the
//! resulting state to every live reader.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error};

use crate::cache::fetch::{FetchReport, Flight, ReportOutcome, ReportSink};
use crate::cache::{
    CacheState, CacheStats, FetchCoordinator, FetchFunction, RefreshControl, Visibility,
};
use crate::error::{FetchError, Result};

// == Read Mode ==
/// How long a read stays subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Deliver exactly one value, then end
    OneShot,
    /// Keep delivering every new value until dropped or failed
    Live,
}

/// What one access to the machine produced.
pub(crate) enum Step<T> {
    /// A tick; only `Public` ticks carry a value for the reader
    Tick { visibility: Visibility<T>, revision: u64 },
    /// A fetch is in flight; its result is the reader's result
    Wait(Flight<T>),
    /// The access cannot proceed
    Fail(FetchError),
}

#[derive(Debug, Clone)]
struct Slot<T> {
    state: CacheState<T>,
    /// Bumped every time a fetched value is stored
    revision: u64,
    stats: CacheStats,
    /// Set once an invariant is broken; the instance is unusable afterwards
    broken: Option<String>,
}

struct Inner<T> {
    slot: watch::Sender<Slot<T>>,
    refresh: Arc<RefreshControl>,
    coordinator: FetchCoordinator<T>,
}

// == Cache State Machine ==
/// Serialization point and state machine of one cached value.
pub struct CacheStateMachine<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CacheStateMachine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn transition<T>(slot: &mut Slot<T>, next: CacheState<T>) {
    debug!(from = slot.state.label(), to = next.label(), "Cache state transition");
    slot.state = next;
}

impl<T> CacheStateMachine<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(refresh: Arc<RefreshControl>, coordinator: FetchCoordinator<T>) -> Self {
        let (slot, _) = watch::channel(Slot {
            state: CacheState::Empty,
            revision: 0,
            stats: CacheStats::new(),
            broken: None,
        });
        Self {
            inner: Arc::new(Inner {
                slot,
                refresh,
                coordinator,
            }),
        }
    }

    pub fn bind(&self, function: FetchFunction<T>) -> Result<()> {
        self.inner.coordinator.bind(function)
    }

    // == Subscribe ==
    /// Registers active interest: an invalid value becomes fetchable again.
    ///
    /// A pending flush is observed first, so a subscription right after an
    /// invalidation always leads to a fresh fetch.
    pub fn subscribe(&self) {
        self.inner.slot.send_if_modified(|slot| match slot.state {
            CacheState::Flush => {
                transition(slot, CacheState::Invalid { should_fetch: false });
                transition(slot, CacheState::Invalid { should_fetch: true });
                true
            }
            CacheState::Invalid { should_fetch: false } => {
                transition(slot, CacheState::Invalid { should_fetch: true });
                true
            }
            _ => false,
        });
    }

    // == Access ==
    /// Evaluates the current state for one reader.
    ///
    /// `delivered` is the revision the reader already received, so a live
    /// reader is not handed the same value twice.
    pub(crate) fn access(&self, delivered: Option<u64>) -> Step<T> {
        let mut step = Step::Tick {
            visibility: Visibility::None,
            revision: 0,
        };
        self.inner.slot.send_if_modified(|slot| {
            if let Some(reason) = &slot.broken {
                step = Step::Fail(FetchError::InternalError(reason.clone()));
                return false;
            }
            match &slot.state {
                CacheState::Empty | CacheState::Invalid { should_fetch: true } => {
                    step = self.launch_locked(slot);
                    matches!(step, Step::Wait(_))
                }
                CacheState::Invalid { should_fetch: false } => false,
                CacheState::Calculating => {
                    step = self.join_locked(slot);
                    false
                }
                CacheState::Flush => {
                    transition(slot, CacheState::Invalid { should_fetch: false });
                    true
                }
                CacheState::Holding(Visibility::Private(value)) => {
                    if self.inner.refresh.should_refresh() {
                        step = self.launch_locked(slot);
                        matches!(step, Step::Wait(_))
                    } else if delivered == Some(slot.revision) {
                        false
                    } else {
                        step = Step::Tick {
                            visibility: Visibility::Public(value.clone()),
                            revision: slot.revision,
                        };
                        slot.stats.record_delivery();
                        false
                    }
                }
                CacheState::Holding(Visibility::Public(_) | Visibility::None) => false,
            }
        });
        step
    }

    // == Force Fetch ==
    /// Fetches regardless of the refresh policy, joining a fetch already in
    /// flight instead of starting a second one.
    pub async fn force_fetch(&self) -> Result<T> {
        let mut step = Step::Fail(FetchError::InternalError("force fetch not evaluated".into()));
        self.inner.slot.send_if_modified(|slot| {
            if let Some(reason) = &slot.broken {
                step = Step::Fail(FetchError::InternalError(reason.clone()));
                return false;
            }
            if slot.state.is_calculating() {
                step = self.join_locked(slot);
                false
            } else {
                step = self.launch_locked(slot);
                matches!(step, Step::Wait(_))
            }
        });
        match step {
            Step::Wait(flight) => flight.await.map(|fetched| fetched.value),
            Step::Fail(err) => Err(err),
            Step::Tick { .. } => Err(FetchError::InternalError(
                "force fetch produced a tick".to_string(),
            )),
        }
    }

    // == Invalidate ==
    /// Moves to `Flush`. An in-flight fetch keeps running for its waiters.
    pub fn invalidate(&self) {
        self.inner.slot.send_modify(|slot| {
            slot.stats.record_invalidation();
            transition(slot, CacheState::Flush);
        });
    }

    /// Wakes live readers so they re-evaluate the refresh policy.
    pub fn poke(&self) {
        self.inner.slot.send_modify(|_| {});
    }

    // == Current Or Fetch ==
    /// A lazy read of the value. Each poll re-evaluates the machine, so a
    /// late reader still triggers or joins a fetch. The subscription is
    /// registered on first poll.
    pub fn current_or_fetch(&self, mode: ReadMode) -> BoxStream<'static, Result<T>> {
        let reader = Reader {
            machine: self.clone(),
            updates: self.inner.slot.subscribe(),
            mode,
            delivered: None,
            started: false,
            done: false,
        };
        stream::unfold(reader, |mut reader| async move {
            reader.next().await.map(|item| (item, reader))
        })
        .boxed()
    }

    /// Forces a fetch, then keeps following every value stored afterwards.
    pub fn fetch_stream(&self) -> BoxStream<'static, Result<T>> {
        let machine = self.clone();
        stream::once(async move {
            let first = machine.force_fetch().await;
            let revision = machine.inner.slot.borrow().revision;
            let follow = match &first {
                Ok(_) => {
                    let mut reader = Reader {
                        updates: machine.inner.slot.subscribe(),
                        machine,
                        mode: ReadMode::Live,
                        delivered: Some(revision),
                        started: true,
                        done: false,
                    };
                    let _ = reader.updates.borrow_and_update();
                    stream::unfold(reader, |mut reader| async move {
                        reader.next().await.map(|item| (item, reader))
                    })
                    .boxed()
                }
                Err(_) => stream::empty().boxed(),
            };
            stream::once(async move { first }).chain(follow)
        })
        .flatten()
        .boxed()
    }

    /// The cached value, if one is held, without triggering anything.
    pub fn peek(&self) -> Option<T> {
        self.inner.slot.borrow().state.value().cloned()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.slot.borrow().stats.clone()
    }

    pub fn refresh_control(&self) -> &Arc<RefreshControl> {
        &self.inner.refresh
    }

    fn launch_locked(&self, slot: &mut Slot<T>) -> Step<T> {
        match self.inner.coordinator.launch(self.report_sink()) {
            Ok(flight) => {
                slot.stats.record_fetch();
                transition(slot, CacheState::Calculating);
                Step::Wait(flight)
            }
            Err(err) => Step::Fail(err),
        }
    }

    fn join_locked(&self, slot: &mut Slot<T>) -> Step<T> {
        match self.inner.coordinator.join() {
            Some(flight) => {
                slot.stats.record_coalesced();
                Step::Wait(flight)
            }
            None => {
                let reason = "calculating without a fetch in flight".to_string();
                error!(%reason, "Cache invariant broken");
                slot.broken = Some(reason.clone());
                Step::Fail(FetchError::InternalError(reason))
            }
        }
    }

    fn report_sink(&self) -> ReportSink<T> {
        let inner: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Arc::new(move |attempt, report| match inner.upgrade() {
            Some(inner) => inner.apply(attempt, report),
            None => ReportOutcome::Superseded,
        })
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    // == Apply Report ==
    /// Writes the outcome of a fetch attempt back into the state.
    fn apply(&self, attempt: u64, report: FetchReport<T>) -> ReportOutcome {
        let mut outcome = ReportOutcome::Superseded;
        self.slot.send_if_modified(|slot| {
            if !self.coordinator.is_latest(attempt) {
                debug!(attempt, "Dropping report of superseded fetch");
                return false;
            }
            match report {
                FetchReport::Value { value, first } => {
                    slot.stats.record_success();
                    let keep = if first {
                        slot.state.is_calculating()
                    } else {
                        !matches!(slot.state, CacheState::Flush)
                    };
                    if keep {
                        self.refresh.record_success(Instant::now());
                        slot.revision += 1;
                        transition(slot, CacheState::Holding(Visibility::Private(value)));
                        outcome = ReportOutcome::Stored(slot.revision);
                    } else {
                        debug!(attempt, "Value fetched after invalidation, not cached");
                        transition(slot, CacheState::Invalid { should_fetch: false });
                        outcome = ReportOutcome::Discarded;
                    }
                }
                FetchReport::Failed(err) => {
                    slot.stats.record_failure();
                    debug!(attempt, error = %err, "Fetch failed, value invalidated");
                    transition(slot, CacheState::Invalid { should_fetch: false });
                    outcome = ReportOutcome::Discarded;
                }
            }
            true
        });
        outcome
    }
}

impl<T> CacheStateMachine<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Human-readable state for logs. Not a stable format.
    pub fn debug_state(&self) -> String {
        self.inner.slot.borrow().state.to_string()
    }

    /// Stream of debug state strings, starting with the current one.
    pub fn states(&self) -> BoxStream<'static, String> {
        WatchStream::new(self.inner.slot.subscribe())
            .map(|slot| slot.state.to_string())
            .boxed()
    }
}

// == Reader ==
struct Reader<T> {
    machine: CacheStateMachine<T>,
    updates: watch::Receiver<Slot<T>>,
    mode: ReadMode,
    delivered: Option<u64>,
    started: bool,
    done: bool,
}

impl<T> Reader<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn next(&mut self) -> Option<Result<T>> {
        if !self.started {
            self.started = true;
            self.machine.subscribe();
        }
        while !self.done {
            let _ = self.updates.borrow_and_update();
            match self.machine.access(self.delivered) {
                Step::Tick {
                    visibility: Visibility::Public(value),
                    revision,
                } => {
                    self.delivered = Some(revision);
                    self.done = self.mode == ReadMode::OneShot;
                    return Some(Ok(value));
                }
                Step::Tick { .. } => match self.mode {
                    // A one-shot read is an active subscription; keep asking.
                    ReadMode::OneShot => self.machine.subscribe(),
                    ReadMode::Live => {
                        if self.updates.changed().await.is_err() {
                            self.done = true;
                        }
                    }
                },
                Step::Wait(flight) => {
                    return match flight.await {
                        Ok(fetched) => {
                            if fetched.revision.is_some() {
                                self.delivered = fetched.revision;
                            }
                            self.done = self.mode == ReadMode::OneShot;
                            Some(Ok(fetched.value))
                        }
                        Err(err) => {
                            self.done = true;
                            Some(Err(err))
                        }
                    };
                }
                Step::Fail(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}
