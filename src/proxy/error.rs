use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::http::{Response, StatusCode};
use crate::upstream::UpstreamError;

/// Message used when the upstream did not supply one of its own.
pub const DEFAULT_ERROR_MESSAGE: &str = "Failed to fetch from upstream catalog";

/// A failure that ends a proxied request with an error response.
///
/// Cache problems never show up here; they are absorbed as
/// [`CacheFault`](super::CacheFault)s.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid catalog path: {reason}")]
    InvalidPath { reason: &'static str },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// JSON body of every error response: `{ error, details?, apiError? }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(rename = "apiError", skip_serializing_if = "Option::is_none")]
    pub api_error: Option<Value>,
}

impl ProxyError {
    /// The upstream's own status when it answered, 400 for bad paths,
    /// 502 for unusable upstream bodies, and 500 otherwise.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPath { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream(e) => e.status().unwrap_or(match e {
                UpstreamError::InvalidBody { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }),
        }
    }

    /// Builds the error body. `details` carries the internal error text and is
    /// only filled in when `expose_details` is set (non-production).
    pub fn body(&self, expose_details: bool) -> ErrorBody {
        let api_error = match self {
            Self::Upstream(UpstreamError::Status { body, .. }) => {
                serde_json::from_slice::<Value>(body).ok()
            }
            _ => None,
        };

        let error = match self {
            Self::InvalidPath { .. } => "Invalid catalog path".to_owned(),
            Self::Upstream(_) => api_error
                .as_ref()
                .and_then(upstream_message)
                .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_owned()),
        };

        ErrorBody {
            error,
            details: expose_details.then(|| self.to_string()),
            api_error,
        }
    }

    pub fn into_response(self, expose_details: bool) -> Response {
        Response::json(self.status(), &self.body(expose_details))
    }
}

// Upstreams report errors either as `{"message": ...}` or, like MangaDex,
// as `{"errors": [{"detail": ...}]}`.
fn upstream_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .or_else(|| {
            body.get("errors")?
                .get(0)?
                .get("detail")
                .and_then(Value::as_str)
        })
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    fn status_error(code: u16, body: &str) -> ProxyError {
        ProxyError::Upstream(UpstreamError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: Bytes::from(body.to_owned()),
        })
    }

    #[test]
    fn upstream_status_is_propagated() {
        assert_eq!(status_error(429, "").status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_error(404, "{}").status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_path_is_a_client_error() {
        let err = ProxyError::InvalidPath { reason: "empty resource path" };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body(false).error, "Invalid catalog path");
    }

    #[test]
    fn invalid_body_is_bad_gateway() {
        let err = ProxyError::Upstream(UpstreamError::InvalidBody {
            reason: "not JSON".to_owned(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn message_and_api_error_come_from_upstream_json() {
        let err = status_error(400, r#"{"message":"bad limit","code":7}"#);
        let body = err.body(false);
        assert_eq!(body.error, "bad limit");
        assert_eq!(body.api_error, Some(json!({"message": "bad limit", "code": 7})));
        assert_eq!(body.details, None);
    }

    #[test]
    fn mangadex_style_errors_are_understood() {
        let err = status_error(
            429,
            r#"{"result":"error","errors":[{"status":429,"detail":"You are being rate limited"}]}"#,
        );
        assert_eq!(err.body(false).error, "You are being rate limited");
    }

    #[test]
    fn non_json_upstream_body_falls_back_to_default_message() {
        let body = status_error(503, "<html>down</html>").body(true);
        assert_eq!(body.error, DEFAULT_ERROR_MESSAGE);
        assert_eq!(body.api_error, None);
        assert_eq!(
            body.details.as_deref(),
            Some("upstream responded with 503 Service Unavailable")
        );
    }

    #[test]
    fn serialized_shape_omits_absent_fields() {
        let value = serde_json::to_value(status_error(500, "").body(false)).unwrap();
        assert_eq!(value, json!({ "error": DEFAULT_ERROR_MESSAGE }));
    }
}
