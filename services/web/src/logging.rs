//! Per-request logger.
//!
//! One [`ApiRequestLogger`] lives for the duration of a request. The
//! middleware feeds it the request, any failure the handler reported, and the
//! response, then asks it to log the completed request once.

use crate::error::CaughtException;
use crate::models::{RequestModel, ResponseModel};
use axum::http::{header, request::Parts, StatusCode};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};
use uuid::Uuid;

/// How much of each request and response is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiLogVerbosity {
    /// Full request and response models, bodies included
    #[default]
    LogEverything,
    /// Query string, bodies and status code as separate fields
    LogMinimalRequest,
    /// No bodies are read or logged
    NoRequestResponse,
}

impl ApiLogVerbosity {
    pub fn captures_bodies(self) -> bool {
        self != ApiLogVerbosity::NoRequestResponse
    }
}

#[derive(Debug)]
pub struct ApiRequestLogger {
    request_id: Uuid,
    verbosity: ApiLogVerbosity,
    started: Instant,
    request: RequestModel,
    response: ResponseModel,
    caught_exception: Option<CaughtException>,
    execution_time: Option<Duration>,
}

impl ApiRequestLogger {
    pub fn new(verbosity: ApiLogVerbosity) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            verbosity,
            started: Instant::now(),
            request: RequestModel::default(),
            response: ResponseModel::default(),
            caught_exception: None,
            execution_time: None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn verbosity(&self) -> ApiLogVerbosity {
        self.verbosity
    }

    pub fn request(&self) -> &RequestModel {
        &self.request
    }

    pub fn response(&self) -> &ResponseModel {
        &self.response
    }

    pub fn caught_exception(&self) -> Option<&CaughtException> {
        self.caught_exception.as_ref()
    }

    /// Set once the request has been logged
    pub fn execution_time(&self) -> Option<Duration> {
        self.execution_time
    }

    pub fn record_request_start(&mut self, parts: &Parts, remote: Option<SocketAddr>, body: &[u8]) {
        let uri = &parts.uri;
        self.request.method = parts.method.to_string();
        self.request.scheme = uri.scheme_str().unwrap_or("http").to_string();
        self.request.host = parts
            .headers
            .get(header::HOST)
            .and_then(|host| host.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|authority| authority.to_string()))
            .unwrap_or_default();
        self.request.path = uri.path().to_string();
        self.request.query_string = uri.query().map(|q| format!("?{}", q)).unwrap_or_default();
        self.request.remote_ip_address = remote.map(|addr| addr.ip().to_string());

        if self.verbosity.captures_bodies() {
            self.request.body = Some(String::from_utf8_lossy(body).into_owned());
        }
    }

    pub fn record_caught_exception(&mut self, exception: CaughtException) {
        self.caught_exception = Some(exception);
    }

    pub fn record_response_end(&mut self, status: StatusCode, body: &[u8]) {
        self.response.status_code = status.as_u16();
        if status != StatusCode::NO_CONTENT && self.verbosity.captures_bodies() {
            self.response.body = Some(String::from_utf8_lossy(body).into_owned());
        }
    }

    pub fn completion_level(&self) -> Level {
        if self.caught_exception.is_some() {
            Level::ERROR
        } else {
            Level::INFO
        }
    }

    pub fn log_completion(&mut self) {
        let elapsed = self.started.elapsed();
        self.execution_time = Some(elapsed);
        let execution_time_ms = elapsed.as_millis() as u64;
        let execution_time_minutes = elapsed.as_secs_f64() / 60.0;

        let (request, response) = match self.verbosity {
            ApiLogVerbosity::LogEverything => {
                (Some(self.request.to_string()), Some(self.response.to_string()))
            }
            _ => (None, None),
        };
        let minimal = self.verbosity == ApiLogVerbosity::LogMinimalRequest;
        let query_string = minimal.then_some(self.request.query_string.as_str());
        let request_body = self.request.body.as_deref().filter(|_| minimal);
        let response_status = minimal.then_some(self.response.status_code);
        let response_body = self.response.body.as_deref().filter(|_| minimal);

        let method = self.request.method.as_str();
        let path = self.request.path.as_str();

        match &self.caught_exception {
            Some(exception) => error!(
                request_id = %self.request_id,
                method,
                path,
                status = self.response.status_code,
                remote_ip_address = self.request.remote_ip_address.as_deref(),
                request = request.as_deref(),
                response = response.as_deref(),
                request_query_string = query_string,
                request_body,
                response_status_code = response_status,
                response_body,
                execution_time_ms,
                execution_time_minutes,
                exception_status = exception.status,
                exception = %exception.message,
                "Request {} to {} completed with exception",
                method,
                path
            ),
            None => info!(
                request_id = %self.request_id,
                method,
                path,
                status = self.response.status_code,
                remote_ip_address = self.request.remote_ip_address.as_deref(),
                request = request.as_deref(),
                response = response.as_deref(),
                request_query_string = query_string,
                request_body,
                response_status_code = response_status,
                response_body,
                execution_time_ms,
                execution_time_minutes,
                "Request {} to {} complete",
                method,
                path
            ),
        }
    }
}
