//! Response DTOs for the demo server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::remote::Quote;

/// Response body for reads of the cached quote (GET /value, POST /refresh)
#[derive(Debug, Clone, Serialize)]
pub struct ValueResponse {
    pub quote: Quote,
    /// When the cached value was last fetched successfully
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl ValueResponse {
    pub fn new(quote: Quote, last_refreshed_at: Option<DateTime<Utc>>) -> Self {
        Self {
            quote,
            last_refreshed_at,
        }
    }
}

/// Response body for commands that return no data (POST /invalidate, POST /events)
#[derive(Debug, Clone, Serialize)]
pub struct AckResponse {
    /// Success message
    pub message: String,
}

impl AckResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Statistics part of the state response
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// failures / (successes + failures)
    pub failure_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        let failure_rate = stats.failure_rate();
        Self {
            stats,
            failure_rate,
        }
    }
}

/// Response body for the diagnostics endpoint (GET /state)
#[derive(Debug, Clone, Serialize)]
pub struct StateResponse {
    /// Debug description of the cache state; not a stable format
    pub state: String,
    pub cached: Option<Quote>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub stats: StatsResponse,
    /// Fetches served by the simulated remote
    pub remote_fetches: u64,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
