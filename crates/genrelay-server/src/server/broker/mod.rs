//! HTTP clients for the two external brokers.
//!
//! - [`dapr`] - publishes generation requests through the Dapr sidecar.
//! - [`webpubsub`] - pushes results to users through the Web PubSub REST API
//!   and issues client access tokens.
//!
//! Both share one `reqwest::Client` built by [`http_client`], so every
//! outbound call carries the configured timeout.

pub mod dapr;
pub mod webpubsub;

use core::time::Duration;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Characters that may not appear verbatim in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub(crate) fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("genrelay/", env!("CARGO_PKG_VERSION")))
        .build()
}
