//! HTTP routes

mod health;
mod poisoning;

use crate::config::{ATTACKER_PATH, VICTIM_PATH};
use crate::state::AppState;
use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use xavyo_openid::OutgoingResponse;

pub use health::health_handler;
pub use poisoning::poisoning_op_handler;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(VICTIM_PATH, any(poisoning_op_handler))
        .route(ATTACKER_PATH, any(poisoning_op_handler))
        .with_state(state)
}

/// Write a protocol response to the wire.
pub(crate) fn into_http_response(response: OutgoingResponse) -> Response {
    let mut builder = Response::builder().status(response.status());
    for (name, value) in response.headers() {
        builder = builder.header(name, value);
    }
    match builder.body(Body::from(response.body())) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
