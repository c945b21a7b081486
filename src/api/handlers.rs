//! API Handlers
//!
//! HTTP request handlers for each demo server endpoint.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::cache::{CacheConfig, CachedValue, ExternalEvent, FetchFunction};
use crate::config::Config;
use crate::error::Result;
use crate::models::{
    AckResponse, ErrorResponse, EventRequest, HealthResponse, RemoteRequest, StateResponse,
    ValueResponse,
};
use crate::remote::{Quote, RemoteQuotes};

const EVENT_BUS_CAPACITY: usize = 16;

/// Application state shared across all handlers.
///
/// The quote is cached in front of the simulated remote; external events are
/// published on a broadcast bus the cache listens to.
#[derive(Clone)]
pub struct AppState {
    pub quote: Arc<CachedValue<Quote>>,
    pub remote: Arc<RemoteQuotes>,
    pub events: broadcast::Sender<ExternalEvent>,
}

impl AppState {
    /// Creates the state and binds the cached quote to `remote`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: CacheConfig, remote: RemoteQuotes) -> Result<Self> {
        let remote = Arc::new(remote);
        let (events, receiver) = broadcast::channel(EVENT_BUS_CAPACITY);
        let quote = CachedValue::with_events(config, receiver);
        quote.bind(FetchFunction::one_shot_weak(&remote, |remote| async move {
            remote.fetch().await
        }))?;

        Ok(Self {
            quote: Arc::new(quote),
            remote,
            events,
        })
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.cache_config(),
            RemoteQuotes::new(config.fetch_latency()),
        )
    }
}

/// Handler for GET /value
///
/// Returns the cached quote, fetching it when missing or due.
pub async fn value_handler(State(state): State<AppState>) -> Result<Json<ValueResponse>> {
    let quote = state.quote.value().await?;
    Ok(Json(ValueResponse::new(
        quote,
        state.quote.last_refreshed_at(),
    )))
}

/// Handler for POST /refresh
///
/// Fetches a new quote regardless of the refresh policy.
pub async fn refresh_handler(State(state): State<AppState>) -> Result<Json<ValueResponse>> {
    let quote = state.quote.refresh().await?;
    info!(sequence = quote.sequence, "Quote refreshed on request");
    Ok(Json(ValueResponse::new(
        quote,
        state.quote.last_refreshed_at(),
    )))
}

/// Handler for POST /invalidate
pub async fn invalidate_handler(State(state): State<AppState>) -> Json<AckResponse> {
    state.quote.invalidate();
    Json(AckResponse::new("Quote invalidated"))
}

/// Handler for POST /events
///
/// Publishes an external event on the bus; the cache decides whether it
/// triggers a refresh.
pub async fn event_handler(
    State(state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> Response {
    if let Some(error_msg) = req.validate() {
        return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(error_msg))).into_response();
    }

    let event = req.to_event();
    // No receiver only means the cache was dropped; nothing to refresh then.
    if state.events.send(event.clone()).is_err() {
        debug!(%event, "Event published without listeners");
    }

    Json(AckResponse::new(format!("Event '{}' published", event))).into_response()
}

/// Handler for GET /state
///
/// Returns cache diagnostics. The `state` string is meant for humans only.
pub async fn state_handler(State(state): State<AppState>) -> Json<StateResponse> {
    Json(StateResponse {
        state: state.quote.debug_state(),
        cached: state.quote.peek(),
        last_refreshed_at: state.quote.last_refreshed_at(),
        stats: state.quote.stats().into(),
        remote_fetches: state.remote.fetch_count(),
    })
}

/// Handler for PUT /remote
///
/// Switches the simulated remote between failing and healthy.
pub async fn remote_handler(
    State(state): State<AppState>,
    Json(req): Json<RemoteRequest>,
) -> Json<AckResponse> {
    state.remote.set_failing(req.failing);
    info!(failing = req.failing, "Remote failure mode changed");
    Json(AckResponse::new(if req.failing {
        "Remote now failing"
    } else {
        "Remote healthy"
    }))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RefreshPolicy;
    use crate::error::FetchError;
    use std::time::Duration;

    fn test_state() -> AppState {
        let config = CacheConfig::new(RefreshPolicy::periodic_and_login(Duration::from_secs(60)));
        AppState::new(config, RemoteQuotes::new(Duration::ZERO)).unwrap()
    }

    #[tokio::test]
    async fn test_value_handler_caches() {
        let state = test_state();

        let first = value_handler(State(state.clone())).await.unwrap();
        let second = value_handler(State(state.clone())).await.unwrap();

        assert_eq!(first.0.quote.sequence, 1);
        assert_eq!(second.0.quote.sequence, 1);
        assert_eq!(state.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_handler_fetches_again() {
        let state = test_state();

        value_handler(State(state.clone())).await.unwrap();
        let refreshed = refresh_handler(State(state.clone())).await.unwrap();

        assert_eq!(refreshed.0.quote.sequence, 2);
        assert!(refreshed.0.last_refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_handler() {
        let state = test_state();
        value_handler(State(state.clone())).await.unwrap();

        invalidate_handler(State(state.clone())).await;
        assert!(state.quote.peek().is_none());

        let fresh = value_handler(State(state.clone())).await.unwrap();
        assert_eq!(fresh.0.quote.sequence, 2);
    }

    #[tokio::test]
    async fn test_value_handler_remote_failure() {
        let state = test_state();
        remote_handler(State(state.clone()), Json(RemoteRequest { failing: true })).await;

        let result = value_handler(State(state.clone())).await;
        assert!(matches!(result, Err(FetchError::FetchFailed(_))));

        remote_handler(State(state.clone()), Json(RemoteRequest { failing: false })).await;
        assert!(value_handler(State(state)).await.is_ok());
    }

    #[tokio::test]
    async fn test_event_handler_rejects_empty_event() {
        let state = test_state();
        let req = EventRequest {
            event: String::new(),
        };

        let response = event_handler(State(state), Json(req)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_state_handler() {
        let state = test_state();
        value_handler(State(state.clone())).await.unwrap();

        let resp = state_handler(State(state)).await;
        assert!(resp.0.state.starts_with("private"));
        assert_eq!(resp.0.stats.stats.successes, 1);
        assert_eq!(resp.0.remote_fetches, 1);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let resp = health_handler().await;
        assert_eq!(resp.0.status, "healthy");
    }
}
