//! Courier Web - request logging and JSON error handling for axum services
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use courier_web::{ApiLogVerbosity, RouterExt, WebRequestError};
//!
//! async fn order() -> Result<&'static str, WebRequestError> {
//!     Err(WebRequestError::not_found("Order not found"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Router::new()
//!         .route("/orders/1", get(order))
//!         .with_api_middleware(ApiLogVerbosity::LogMinimalRequest);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod middleware;
pub mod models;

pub use error::{CaughtException, WebRequestError};
pub use logging::{ApiLogVerbosity, ApiRequestLogger};
pub use middleware::{handle_panic, log_requests, RouterExt, MAX_REQUEST_BODY_BYTES};
pub use models::{JsonWebErrorResponse, RequestModel, ResponseModel};
