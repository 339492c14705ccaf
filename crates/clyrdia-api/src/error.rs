use axum::Json;
use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use clyrdia_engine::{AdmissionError, ErrorKind};
use serde::Serialize;

/// Seconds a rate-limited client is told to wait.
const RETRY_AFTER_SECS: &str = "60";

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: &'static str,
    detail: String,
    error_code: &'static str,
    timestamp: DateTime<Utc>,
    request_id: Option<String>,
}

/// JSON error response: `{error, detail, error_code, timestamp, request_id}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn code_of(status: StatusCode) -> &'static str {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited.code(),
        StatusCode::PAYLOAD_TOO_LARGE => ErrorKind::PayloadTooLarge.code(),
        StatusCode::NOT_FOUND => ErrorKind::NotFound.code(),
        StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized.code(),
        StatusCode::SERVICE_UNAVAILABLE => ErrorKind::Unavailable.code(),
        s if s.is_server_error() => ErrorKind::Internal.code(),
        _ => ErrorKind::BadRequest.code(),
    }
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error: status.canonical_reason().unwrap_or("Error"),
                detail: detail.into(),
                error_code: code_of(status),
                timestamp: Utc::now(),
                request_id: None,
            },
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.body.request_id = Some(request_id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn detail(&self) -> &str {
        &self.body.detail
    }
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        Self::new(status_of(e.kind), e.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(self.body)).into_response();
        let headers = response.headers_mut();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                headers.insert(RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
            }
            StatusCode::UNAUTHORIZED => {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        let err = ApiError::from(AdmissionError::rate_limited());
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body.error_code, "RATE_LIMITED");

        let err = ApiError::from(AdmissionError::internal("Internal server error during contract analysis"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.error, "Internal Server Error");
        assert_eq!(err.detail(), "Internal server error during contract analysis");
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = ApiError::from(AdmissionError::rate_limited()).into_response();
        assert_eq!(response.headers()[RETRY_AFTER], "60");
    }
}
