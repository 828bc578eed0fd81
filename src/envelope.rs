// =============================================================================
// DATAGO — Response envelope
// =============================================================================
// Every HTTP response is an ApiEnvelope<T>: exactly one of data/error is set
// and `success` agrees with `data`. Cached responses are stored as the whole
// envelope so a hit replays the original body with metadata.cached flipped.
// =============================================================================

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorInfo {
    /// Wire form of a GatewayError. In production, internal failures are
    /// stripped down to a generic phrase with no details.
    pub fn from_error(err: &GatewayError, production: bool) -> Self {
        let internal = err.code() == "INTERNAL_SERVER_ERROR";
        if production && internal {
            return Self {
                code: err.code().to_string(),
                message: "an unexpected error occurred".to_string(),
                details: None,
                retryable: Some(err.retryable()),
            };
        }
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: err.details(),
            retryable: Some(err.retryable()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// RFC 3339 instant the envelope was produced.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    /// Wall time spent handling the request, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

impl EnvelopeMetadata {
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            cached: None,
            processing_time: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorInfo>,
    pub metadata: EnvelopeMetadata,
}

impl<T> ApiEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: EnvelopeMetadata::now(),
        }
    }

    pub fn failure(err: &GatewayError, production: bool) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorInfo::from_error(err, production)),
            metadata: EnvelopeMetadata::now(),
        }
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.metadata.cached = Some(cached);
        self
    }

    pub fn with_processing_time(mut self, ms: u64) -> Self {
        self.metadata.processing_time = Some(ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_has_data_and_no_error() {
        let env = ApiEnvelope::success(json!({ "n": 1 }));
        assert!(env.success);
        assert!(env.data.is_some());
        assert!(env.error.is_none());
    }

    #[test]
    fn test_failure_envelope_has_error_and_no_data() {
        let env: ApiEnvelope<serde_json::Value> =
            ApiEnvelope::failure(&GatewayError::validation("bad input"), false);
        assert!(!env.success);
        assert!(env.data.is_none());
        let err = env.error.expect("failure envelopes carry an error");
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert_eq!(err.message, "bad input");
    }

    #[test]
    fn test_production_masks_internal_details() {
        let raw = GatewayError::Internal("db password leaked in trace".into());
        let masked = ErrorInfo::from_error(&raw, true);
        assert_eq!(masked.code, "INTERNAL_SERVER_ERROR");
        assert!(!masked.message.contains("password"), "message must be generic");
        assert!(masked.details.is_none());

        let dev = ErrorInfo::from_error(&raw, false);
        assert!(dev.message.contains("db password"), "dev keeps the real message");
    }

    #[test]
    fn test_production_keeps_classified_errors() {
        let err = GatewayError::validation("x must be a number");
        let info = ErrorInfo::from_error(&err, true);
        assert_eq!(info.message, "x must be a number");
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let env = ApiEnvelope::success(json!(1)).with_cached(false).with_processing_time(12);
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["metadata"]["cached"], false);
        assert_eq!(wire["metadata"]["processingTime"], 12);
        assert!(wire["metadata"]["timestamp"].is_string());
    }

    #[test]
    fn test_cached_replay_round_trips() {
        let env = ApiEnvelope::success(json!({ "k": "v" })).with_cached(false);
        let stored = serde_json::to_value(&env).unwrap();
        let mut replay: ApiEnvelope<serde_json::Value> = serde_json::from_value(stored).unwrap();
        replay.metadata.cached = Some(true);
        assert_eq!(replay.data, env.data);
        assert_eq!(replay.metadata.timestamp, env.metadata.timestamp);
        assert_eq!(replay.metadata.cached, Some(true));
    }
}
