//! Remote Quote Source
//!
//! A simulated slow remote used by the demo server as the fetch function of
//! its cached value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// One fetched quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    /// Number of the fetch that produced this quote, starting at 1
    pub sequence: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Stand-in for a network client.
#[derive(Debug)]
pub struct RemoteQuotes {
    latency: Duration,
    sequence: AtomicU64,
    failing: AtomicBool,
}

impl RemoteQuotes {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            sequence: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every following fetch fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    /// Number of fetches served so far, failed ones included.
    pub fn fetch_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub async fn fetch(&self) -> anyhow::Result<Quote> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        if self.is_failing() {
            anyhow::bail!("remote quote service unavailable (request {sequence})");
        }
        debug!(sequence, "Remote quote served");
        Ok(Quote {
            sequence,
            fetched_at: Utc::now(),
        })
    }
}
