//! Request errors rendered as JSON error bodies.

use crate::models::JsonWebErrorResponse;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

/// A failure with a known status code and a message safe to return to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WebRequestError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl WebRequestError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    /// 500 with a generic message; `detail` is logged but never returned
    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: INTERNAL_SERVER_ERROR.to_string(),
            detail: Some(detail.into()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl From<anyhow::Error> for WebRequestError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", error))
    }
}

/// Failure attached to a response so the request logger can report it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaughtException {
    pub status: u16,
    pub message: String,
}

impl From<&WebRequestError> for CaughtException {
    fn from(error: &WebRequestError) -> Self {
        Self {
            status: error.status.as_u16(),
            message: error.detail.clone().unwrap_or_else(|| error.message.clone()),
        }
    }
}

impl IntoResponse for WebRequestError {
    fn into_response(self) -> Response {
        let body = JsonWebErrorResponse {
            status_code: self.status.as_u16(),
            message: self.message.clone(),
        };

        let mut response = (self.status, body.to_string()).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
            .extensions_mut()
            .insert(CaughtException::from(&self));
        response
    }
}
