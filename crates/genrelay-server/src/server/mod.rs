//! Server side of the relay: configuration, broker clients, HTTP service and
//! telemetry.
//!
//! - [`config`] - CLI and environment configuration.
//! - [`broker`] - Dapr and Web PubSub HTTP clients.
//! - [`service`] - axum routes, the Web PubSub webhook and background tasks.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod broker;
pub mod config;
pub mod service;
pub mod telemetry;
