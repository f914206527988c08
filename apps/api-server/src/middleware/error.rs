//! Error handling - RFC 7807 compliant responses.

use actix_web::http::StatusCode;
use actix_web::http::header::{HeaderValue, RETRY_AFTER};
use actix_web::{HttpResponse, ResponseError};
use sluice_core::QuotaExceeded;
use sluice_shared::ErrorResponse;
use std::fmt;

use super::throttle::apply_headers;

/// Application-level error type that converts to RFC 7807 responses.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Throttled(QuotaExceeded),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Throttled(denied) => write!(f, "Throttled: {}", denied),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Throttled(denied) => {
                StatusCode::from_u16(denied.status).unwrap_or(StatusCode::TOO_MANY_REQUESTS)
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            AppError::NotFound(detail) => ErrorResponse::not_found(detail),
            AppError::BadRequest(detail) => ErrorResponse::bad_request(detail),
            AppError::Throttled(denied) => {
                return throttled_response(self.status_code(), denied);
            }
        };

        HttpResponse::build(self.status_code()).json(error)
    }
}

/// Denial body plus the same usage headers an admitted request carries.
fn throttled_response(status: StatusCode, denied: &QuotaExceeded) -> HttpResponse {
    let retry_after = denied.retry_after().as_secs();
    let body = ErrorResponse::throttled(denied.status, &denied.message)
        .with_quota(denied.quota.limit(), retry_after);

    let mut response = HttpResponse::build(status).json(body);
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    apply_headers(headers, &denied.headers);
    response
}

impl From<QuotaExceeded> for AppError {
    fn from(denied: QuotaExceeded) -> Self {
        AppError::Throttled(denied)
    }
}

/// Result type alias for handlers.
pub type AppResult<T> = Result<T, AppError>;
