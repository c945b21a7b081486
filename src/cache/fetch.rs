//! Fetch Coordinator Module
//!
//! Runs the bound fetch function with single-flight semantics. Every launched
//! attempt is spawned on the runtime and exposed as a shared [`Flight`], so
//! any number of callers can await one execution and dropping them never
//! cancels the fetch.

use std::any::type_name;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{self, BoxFuture, FutureExt, Shared, TryFutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::FetchPriority;
use crate::error::{FetchError, Result};

type OneShotFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;
type ContinuousFn<T> = Arc<dyn Fn() -> BoxStream<'static, Result<T>> + Send + Sync>;

// == Fetch Function ==
/// The caller-supplied way of producing a value, bound once per cache.
pub enum FetchFunction<T> {
    /// Produces exactly one result per call
    OneShot(OneShotFn<T>),
    /// Produces a sequence of results over time
    Continuous(ContinuousFn<T>),
}

impl<T> Clone for FetchFunction<T> {
    fn clone(&self) -> Self {
        match self {
            FetchFunction::OneShot(f) => FetchFunction::OneShot(Arc::clone(f)),
            FetchFunction::Continuous(f) => FetchFunction::Continuous(Arc::clone(f)),
        }
    }
}

impl<T: Send + 'static> FetchFunction<T> {
    /// Binds an async function returning one value per call.
    pub fn one_shot<F, Fut>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        FetchFunction::OneShot(Arc::new(move || {
            fetch().map_err(FetchError::failed).boxed()
        }))
    }

    /// Binds a function returning a stream of values.
    pub fn continuous<F, S>(fetch: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
    {
        FetchFunction::Continuous(Arc::new(move || {
            fetch().map_err(FetchError::failed).boxed()
        }))
    }

    /// Like [`FetchFunction::one_shot`], but only keeps a weak reference to
    /// `owner`. Once the owner is dropped every call fails with
    /// [`FetchError::NullReference`].
    pub fn one_shot_weak<O, F, Fut>(owner: &Arc<O>, fetch: F) -> Self
    where
        O: Send + Sync + 'static,
        F: Fn(Arc<O>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let owner: Weak<O> = Arc::downgrade(owner);
        FetchFunction::OneShot(Arc::new(move || match owner.upgrade() {
            Some(owner) => fetch(owner).map_err(FetchError::failed).boxed(),
            None => future::ready(Err(FetchError::NullReference(type_name::<O>()))).boxed(),
        }))
    }

    /// Weak-owner variant of [`FetchFunction::continuous`].
    pub fn continuous_weak<O, F, S>(owner: &Arc<O>, fetch: F) -> Self
    where
        O: Send + Sync + 'static,
        F: Fn(Arc<O>) -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
    {
        let owner: Weak<O> = Arc::downgrade(owner);
        FetchFunction::Continuous(Arc::new(move || match owner.upgrade() {
            Some(owner) => fetch(owner).map_err(FetchError::failed).boxed(),
            None => stream::once(future::ready(Err(FetchError::NullReference(
                type_name::<O>(),
            ))))
            .boxed(),
        }))
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, FetchFunction::Continuous(_))
    }
}

// == Flight ==
/// Result of one fetch attempt as seen by its waiters.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    /// Revision the value was stored under; `None` if it was never stored
    /// because the attempt was superseded or flushed.
    pub revision: Option<u64>,
}

/// A shared handle on an in-flight fetch attempt.
pub type Flight<T> = Shared<BoxFuture<'static, Result<Fetched<T>>>>;

/// What a running attempt reports back to the state machine.
#[derive(Debug)]
pub(crate) enum FetchReport<T> {
    Value { value: T, first: bool },
    Failed(FetchError),
}

/// How the state machine took a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReportOutcome {
    /// Stored under the given revision
    Stored(u64),
    /// Accepted for this attempt's waiters but not cached
    Discarded,
    /// A newer attempt replaced this one
    Superseded,
}

pub(crate) type ReportSink<T> = Arc<dyn Fn(u64, FetchReport<T>) -> ReportOutcome + Send + Sync>;

struct CoordinatorInner<T> {
    binding: Option<FetchFunction<T>>,
    sealed: bool,
    latest: u64,
    pending: Option<(u64, Flight<T>)>,
    /// Running continuous attempt and its id
    stream_task: Option<(u64, AbortHandle)>,
    /// When the most recent attempt started or is scheduled to start
    last_start: Option<Instant>,
}

// == Fetch Coordinator ==
/// Single-flight executor for one cached value.
pub struct FetchCoordinator<T> {
    priority: FetchPriority,
    inner: Arc<Mutex<CoordinatorInner<T>>>,
}

impl<T> FetchCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(priority: FetchPriority) -> Self {
        Self {
            priority,
            inner: Arc::new(Mutex::new(CoordinatorInner {
                binding: None,
                sealed: false,
                latest: 0,
                pending: None,
                stream_task: None,
                last_start: None,
            })),
        }
    }

    pub fn priority(&self) -> FetchPriority {
        self.priority
    }

    // == Bind ==
    /// Binds the fetch function. Rebinding is allowed until the first attempt
    /// has been launched.
    pub fn bind(&self, function: FetchFunction<T>) -> Result<()> {
        let mut inner = self.lock();
        if inner.sealed {
            return Err(FetchError::InternalError(
                "fetch function rebound after first use".to_string(),
            ));
        }
        inner.binding = Some(function);
        Ok(())
    }

    /// Returns true if `attempt` is the most recently launched attempt.
    pub(crate) fn is_latest(&self, attempt: u64) -> bool {
        self.lock().latest == attempt
    }

    // == Join ==
    /// Returns the attempt still awaiting its first result, if any.
    pub fn join(&self) -> Option<Flight<T>> {
        self.lock().pending.as_ref().map(|(_, flight)| flight.clone())
    }

    // == Launch ==
    /// Starts a new attempt and returns its flight.
    ///
    /// An attempt still pending from before is not cancelled; the new one
    /// starts only after it resolved, so executions never overlap. A running
    /// continuous stream that already delivered is aborted right away, one
    /// still waiting for its first value once that value is out.
    ///
    /// Under `Throttled(window)` an attempt launched within `window` of the
    /// previous start waits for the rest of the window; otherwise it runs
    /// immediately.
    pub(crate) fn launch(&self, sink: ReportSink<T>) -> Result<Flight<T>> {
        let mut inner = self.lock();
        let function = inner.binding.clone().ok_or(FetchError::UnsetFetchFunction)?;

        inner.sealed = true;
        inner.latest += 1;
        let attempt = inner.latest;
        let predecessor = inner.pending.take();
        let superseded_stream = match inner.stream_task.take() {
            Some((owner, task)) if matches!(predecessor, Some((pending, _)) if pending == owner) => {
                Some(task)
            }
            Some((_, task)) => {
                task.abort();
                None
            }
            None => None,
        };
        let predecessor = predecessor.map(|(_, flight)| flight);

        let now = Instant::now();
        let delay = match self.priority {
            FetchPriority::FetchAll => None,
            FetchPriority::Throttled(window) => inner
                .last_start
                .map(|start| now.saturating_duration_since(start))
                .filter(|since| *since < window)
                .map(|since| window - since),
        };
        inner.last_start = Some(now + delay.unwrap_or_default());

        let (sender, receiver) = oneshot::channel();
        let settle = Settle {
            inner: Arc::clone(&self.inner),
            attempt,
            sender: Some(sender),
        };
        let is_continuous = function.is_continuous();

        let task = async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(predecessor) = predecessor {
                let _ = predecessor.await;
            }
            if let Some(task) = superseded_stream {
                task.abort();
            }
            debug!(attempt, "Running fetch");
            match function {
                FetchFunction::OneShot(fetch) => run_one_shot(fetch, attempt, sink, settle).await,
                FetchFunction::Continuous(fetch) => {
                    run_continuous(fetch, attempt, sink, settle).await
                }
            }
        };
        let handle = tokio::spawn(task);
        if is_continuous {
            inner.stream_task = Some((attempt, handle.abort_handle()));
        }

        let flight = receiver
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(FetchError::failed(anyhow::anyhow!(
                        "fetch task ended without a result"
                    )))
                })
            })
            .boxed()
            .shared();
        inner.pending = Some((attempt, flight.clone()));
        Ok(flight)
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves an attempt's waiters and clears it from the pending slot.
struct Settle<T> {
    inner: Arc<Mutex<CoordinatorInner<T>>>,
    attempt: u64,
    sender: Option<oneshot::Sender<Result<Fetched<T>>>>,
}

impl<T> Settle<T> {
    fn is_settled(&self) -> bool {
        self.sender.is_none()
    }

    fn resolve(&mut self, result: Result<Fetched<T>>) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(inner.pending, Some((attempt, _)) if attempt == self.attempt) {
                inner.pending = None;
            }
        }
        // Every waiter may be gone already.
        let _ = sender.send(result);
    }
}

fn panicked() -> FetchError {
    FetchError::failed(anyhow::anyhow!("fetch function panicked"))
}

async fn run_one_shot<T: Clone + Send + 'static>(
    fetch: OneShotFn<T>,
    attempt: u64,
    sink: ReportSink<T>,
    mut settle: Settle<T>,
) {
    let result = AssertUnwindSafe(async move { fetch().await })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(panicked()));

    match result {
        Ok(value) => {
            let revision = match sink(attempt, FetchReport::Value { value: value.clone(), first: true }) {
                ReportOutcome::Stored(revision) => Some(revision),
                ReportOutcome::Discarded | ReportOutcome::Superseded => None,
            };
            settle.resolve(Ok(Fetched { value, revision }));
        }
        Err(err) => {
            warn!(attempt, error = %err, "Fetch failed");
            sink(attempt, FetchReport::Failed(err.clone()));
            settle.resolve(Err(err));
        }
    }
}

async fn run_continuous<T: Clone + Send + 'static>(
    fetch: ContinuousFn<T>,
    attempt: u64,
    sink: ReportSink<T>,
    mut settle: Settle<T>,
) {
    let mut values = match AssertUnwindSafe(async move { fetch() }).catch_unwind().await {
        Ok(values) => values,
        Err(_) => stream::once(future::ready(Err(panicked()))).boxed(),
    };

    loop {
        let next = AssertUnwindSafe(values.next())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Some(Err(panicked())));

        match next {
            Some(Ok(value)) => {
                let first = !settle.is_settled();
                let outcome = sink(attempt, FetchReport::Value { value: value.clone(), first });
                let revision = match outcome {
                    ReportOutcome::Stored(revision) => Some(revision),
                    ReportOutcome::Discarded | ReportOutcome::Superseded => None,
                };
                settle.resolve(Ok(Fetched { value, revision }));
                if outcome == ReportOutcome::Superseded {
                    debug!(attempt, "Continuous fetch superseded, stopping");
                    break;
                }
            }
            Some(Err(err)) => {
                warn!(attempt, error = %err, "Continuous fetch failed");
                sink(attempt, FetchReport::Failed(err.clone()));
                settle.resolve(Err(err));
                break;
            }
            None => {
                if !settle.is_settled() {
                    let err = FetchError::failed(anyhow::anyhow!(
                        "fetch stream completed without producing a value"
                    ));
                    sink(attempt, FetchReport::Failed(err.clone()));
                    settle.resolve(Err(err));
                } else {
                    debug!(attempt, "Continuous fetch completed");
                }
                break;
            }
        }
    }
}
