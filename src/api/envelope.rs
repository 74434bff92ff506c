//! JSON envelope shared by every `/api/v1` endpoint
//!
//! ```text
//! 200  { "data": {...},                          "meta": { "timestamp": "...", "version": "1" } }
//! 4xx  { "error": { "code": "...", "message" }, "meta": { ... } }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

const API_VERSION: &str = "1";

#[derive(Debug, Serialize)]
struct Meta {
    timestamp: String,
    version: &'static str,
}

impl Meta {
    fn at(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            version: API_VERSION,
        }
    }
}

/// Machine-readable error codes and their HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    BadRequest,
    Internal,
    /// Webhook unreachable or rejected the delivery
    DeliveryFailed,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DeliveryFailed => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Internal => "INTERNAL_ERROR",
            ErrorCode::DeliveryFailed => "DELIVERY_FAILED",
        }
    }
}

/// Success wrapper.
pub struct ApiResponse;

impl ApiResponse {
    pub fn ok<T: Serialize>(data: T) -> Response {
        #[derive(Serialize)]
        struct Body<T> {
            data: T,
            meta: Meta,
        }
        Json(Body {
            data,
            meta: Meta::at(Utc::now()),
        })
        .into_response()
    }
}

/// Error wrapper.
pub struct ApiErrorResponse;

impl ApiErrorResponse {
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Response {
        #[derive(Serialize)]
        struct Detail {
            code: &'static str,
            message: String,
        }
        #[derive(Serialize)]
        struct Body {
            error: Detail,
            meta: Meta,
        }
        let body = Body {
            error: Detail {
                code: code.as_str(),
                message: message.into(),
            },
            meta: Meta::at(Utc::now()),
        };
        (code.status(), Json(body)).into_response()
    }

    pub fn not_found(message: impl Into<String>) -> Response {
        Self::with_code(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Response {
        Self::with_code(ErrorCode::BadRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Response {
        Self::with_code(ErrorCode::Internal, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Response {
        Self::with_code(ErrorCode::DeliveryFailed, message)
    }
}
