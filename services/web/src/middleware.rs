//! Request logging and panic capture for axum routers.

use crate::error::{CaughtException, WebRequestError};
use crate::logging::{ApiLogVerbosity, ApiRequestLogger};
use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use http_body_util::LengthLimitError;
use std::any::Any;
use std::error::Error as StdError;
use std::net::SocketAddr;
use tower_http::catch_panic::CatchPanicLayer;

/// Largest request body buffered for logging
pub const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Buffer the request and response, log the completed request.
///
/// Bodies are only buffered when the verbosity captures them; with
/// [`ApiLogVerbosity::NoRequestResponse`] both pass through unread.
/// Failures reported by [`WebRequestError`] responses (including panics
/// converted by [`handle_panic`]) are logged at error level.
pub async fn log_requests(
    State(verbosity): State<ApiLogVerbosity>,
    request: Request,
    next: Next,
) -> Response {
    let mut logger = ApiRequestLogger::new(verbosity);
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();
    if !verbosity.captures_bodies() {
        logger.record_request_start(&parts, remote, &[]);
        let response = next.run(Request::from_parts(parts, body)).await;
        return finish(logger, response).await;
    }

    let bytes = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            logger.record_request_start(&parts, remote, &[]);
            let error = if is_length_limit(&e) {
                WebRequestError::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("Request body exceeds {} bytes", MAX_REQUEST_BODY_BYTES),
                )
            } else {
                WebRequestError::internal(format!("Failed to read request body: {}", e))
            };
            return finish(logger, error.into_response()).await;
        }
    };
    logger.record_request_start(&parts, remote, &bytes);

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    finish(logger, response).await
}

async fn finish(mut logger: ApiRequestLogger, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    if let Some(exception) = parts.extensions.remove::<CaughtException>() {
        logger.record_caught_exception(exception);
    }

    if !logger.verbosity().captures_bodies() {
        logger.record_response_end(parts.status, &[]);
        logger.log_completion();
        return Response::from_parts(parts, body);
    }

    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let error = WebRequestError::internal(format!("Failed to read response body: {}", e));
            logger.record_caught_exception(CaughtException::from(&error));
            let response = error.into_response();
            logger.record_response_end(response.status(), &[]);
            logger.log_completion();
            return response;
        }
    };

    logger.record_response_end(parts.status, &bytes);
    logger.log_completion();
    Response::from_parts(parts, Body::from(bytes))
}

fn is_length_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Turn a handler panic into a 500 JSON error
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };

    WebRequestError::internal(format!("Handler panicked: {}", detail)).into_response()
}

pub trait RouterExt {
    /// Install request logging and panic capture
    fn with_api_middleware(self, verbosity: ApiLogVerbosity) -> Self;
}

impl<S> RouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_api_middleware(self, verbosity: ApiLogVerbosity) -> Self {
        self.layer(CatchPanicLayer::custom(handle_panic))
            .layer(middleware::from_fn_with_state(verbosity, log_requests))
    }
}
