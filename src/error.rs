//! Error types for the cached value engine
//!
//! Provides the fetch error taxonomy using thiserror.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Fetch Error Enum ==
/// Errors surfaced to every consumer of a cached value.
///
/// The type is `Clone` because a single failed fetch is handed out to every
/// caller that was coalesced onto it.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// The bound fetch function returned an error
    #[error("Fetch failed: {0}")]
    FetchFailed(Arc<anyhow::Error>),

    /// No fetch function was bound before the first access
    #[error("Fetch function is not set")]
    UnsetFetchFunction,

    /// A state machine invariant was broken; the instance must not be reused
    #[error("Internal error: {0}")]
    InternalError(String),

    /// The object owning the fetch function has been dropped
    #[error("Null reference: owner `{0}` of the fetch function was dropped")]
    NullReference(&'static str),
}

impl FetchError {
    /// Wraps an arbitrary error coming out of a fetch function.
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        FetchError::FetchFailed(Arc::new(err.into()))
    }

    /// Returns true if the error leaves the cache usable for a retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FetchError::FetchFailed(_) | FetchError::NullReference(_)
        )
    }
}

impl PartialEq for FetchError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FetchError::FetchFailed(a), FetchError::FetchFailed(b)) => Arc::ptr_eq(a, b),
            (FetchError::UnsetFetchFunction, FetchError::UnsetFetchFunction) => true,
            (FetchError::InternalError(a), FetchError::InternalError(b)) => a == b,
            (FetchError::NullReference(a), FetchError::NullReference(b)) => a == b,
            _ => false,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let status = match &self {
            FetchError::FetchFailed(_) => StatusCode::BAD_GATEWAY,
            FetchError::NullReference(_) => StatusCode::SERVICE_UNAVAILABLE,
            FetchError::UnsetFetchFunction | FetchError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache reads.
pub type Result<T> = std::result::Result<T, FetchError>;
