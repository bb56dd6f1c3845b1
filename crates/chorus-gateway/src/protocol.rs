//! Gateway REST protocol — JSON reply bodies and the HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use chorus_core::{ChorusError, ExchangeReply, ProviderError, ProviderHealth, SearchHit};

/// Error payload for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub error: String,
    pub message: String,
}

/// One chat's exchanges, oldest prompt first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryReply {
    pub chat_id: String,
    pub exchanges: Vec<ExchangeReply>,
}

/// Result page for GET /api/search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReply {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

/// Body for GET /api/providers/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub providers: Vec<ProviderHealth>,
}

/// Body for GET /api/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReply {
    pub status: String,
    pub providers: usize,
    pub uptime_secs: u64,
}

// ── Error mapping ──

/// An orchestration error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ChorusError);

impl From<ChorusError> for ApiError {
    fn from(err: ChorusError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Status and stable error code for the wrapped failure. Caller mistakes
    /// are 4xx; anything that went wrong past the gateway is 5xx.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            ChorusError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ChorusError::UnknownProvider(_) => (StatusCode::BAD_REQUEST, "unknown_provider"),
            ChorusError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ChorusError::Provider {
                source: ProviderError::Timeout,
                ..
            } => (StatusCode::GATEWAY_TIMEOUT, "provider_timeout"),
            ChorusError::Provider { .. } => (StatusCode::BAD_GATEWAY, "provider_failure"),
            ChorusError::Aggregation(_) => (StatusCode::BAD_GATEWAY, "aggregation_failure"),
            ChorusError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_failure"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            warn!("Request failed upstream: {}", self.0);
        }
        let body = ErrorBody {
            error: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_caller_mistakes_map_to_4xx() {
        let cases = vec![
            (
                ChorusError::Validation("prompt is empty".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ChorusError::UnknownProvider("mistral".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ChorusError::NotFound("prompt abc".to_string()),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_provider_timeout_maps_to_504() {
        let err = ChorusError::Provider {
            provider: "ollama".to_string(),
            source: ProviderError::Timeout,
        };
        assert_eq!(
            ApiError(err).into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_upstream_failures_map_to_502() {
        let cases = vec![
            ChorusError::Provider {
                provider: "openai".to_string(),
                source: ProviderError::Auth("401".to_string()),
            },
            ChorusError::Provider {
                provider: "openai".to_string(),
                source: ProviderError::RateLimited { retry_after: None },
            },
            ChorusError::Provider {
                provider: "ollama".to_string(),
                source: ProviderError::Network("connection refused".to_string()),
            },
            ChorusError::Aggregation("aggregator 'azure' failed".to_string()),
        ];
        for err in cases {
            assert_eq!(
                ApiError(err).into_response().status(),
                StatusCode::BAD_GATEWAY
            );
        }
    }

    #[test]
    fn test_store_failure_maps_to_500() {
        let err = ChorusError::Store(anyhow!("disk full"));
        assert_eq!(
            ApiError(err).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_serialize() {
        let body = ErrorBody {
            error: "unknown_provider".to_string(),
            message: "unknown provider 'mistral'".to_string(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"error\":\"unknown_provider\""));
        assert!(json.contains("mistral"));
    }

    #[test]
    fn test_health_reply_serialize() {
        let body = HealthReply {
            status: "ok".to_string(),
            providers: 3,
            uptime_secs: 42,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"providers\":3"));
        assert!(json.contains("\"uptime_secs\":42"));
    }
}
