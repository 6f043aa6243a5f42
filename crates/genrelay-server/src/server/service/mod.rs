//! HTTP surface of the relay.
//!
//! ## Structure
//!
//! - [`handler`] - shared state ([`RelayService`]) and the plain HTTP routes.
//! - [`eventhandler`] - the Web PubSub CloudEvents webhook.
//! - [`sweeper`] - background eviction of expired results.
//!
//! [`RelayService`]: handler::RelayService

pub mod eventhandler;
pub mod handler;
pub mod sweeper;

#[cfg(test)]
mod mock;

use axum::Router;
use axum::routing::{get, post};
use handler::RelayService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builds the application router with every route and middleware attached.
pub fn router(service: RelayService) -> Router {
    Router::new()
        .route("/test", get(handler::test_request))
        .route("/lookup", get(handler::lookup))
        .route("/newImage", post(handler::new_image))
        .route("/dapr/subscribe", get(handler::dapr_subscribe))
        .route("/negotiate", get(handler::negotiate))
        .route("/healthz", get(handler::healthz))
        .route(
            "/eventhandler",
            post(eventhandler::handle_event).options(eventhandler::abuse_protection),
        )
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
