// =============================================================================
// DATAGO — Error taxonomy
// =============================================================================
// Closed set of error codes shared by every component. Internal boundaries
// return Result<_, GatewayError>; conversion into an HTTP envelope happens
// once, at the handler edge (see handlers.rs).
// =============================================================================

use axum::http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API key unavailable: {0}")]
    ApiKey(String),

    #[error("access denied: {0}")]
    Authorization(String),

    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("{message}")]
    SchemaValidation {
        message: String,
        details: Option<Value>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{message}")]
    RateLimit {
        message: String,
        limit: u64,
        retry_after_secs: u64,
    },

    #[error("{message}")]
    ExternalApi {
        message: String,
        /// Upstream HTTP status, absent for transport-level failures.
        status: Option<u16>,
    },

    #[error("upstream timed out after {0} ms")]
    Timeout(u64),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{message}")]
    Coordinate {
        message: String,
        details: Option<Value>,
    },

    #[error("cache failure: {0}")]
    Cache(String),

    #[error("configuration invalid: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn coordinate(message: impl Into<String>) -> Self {
        Self::Coordinate {
            message: message.into(),
            details: None,
        }
    }

    /// Stable machine-readable code, one per taxonomy entry.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AUTH_ERROR",
            Self::ApiKey(_) => "API_KEY_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::SchemaValidation { .. } => "SCHEMA_VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
            Self::ExternalApi { .. } => "EXTERNAL_API_ERROR",
            Self::Timeout(_) => "TIMEOUT_ERROR",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
            Self::Coordinate { .. } => "COORDINATE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) | Self::ApiKey(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Validation { .. }
            | Self::SchemaValidation { .. }
            | Self::Coordinate { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ExternalApi { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) | Self::Cache(_) | Self::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a caller may meaningfully retry the same request.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. }
                | Self::ExternalApi { .. }
                | Self::Timeout(_)
                | Self::Unavailable(_)
        )
    }

    /// Structured context carried alongside the message, if any.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { details, .. }
            | Self::SchemaValidation { details, .. }
            | Self::Coordinate { details, .. } => details.clone(),
            Self::RateLimit {
                limit,
                retry_after_secs,
                ..
            } => Some(json!({ "limit": limit, "retryAfter": retry_after_secs })),
            Self::ExternalApi {
                status: Some(code), ..
            } => Some(json!({ "upstreamStatus": code })),
            _ => None,
        }
    }
}
