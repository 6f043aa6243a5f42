//! Error types for the relay core.
//!
//! This module defines the central `Error` enum, which captures every failure
//! that is allowed to escape a component. Validation problems do not appear
//! here: malformed and empty payloads are reported through
//! [`Normalized::Invalid`](crate::Normalized) and the outcome enums of the
//! router and bridge, and are never escalated.
//!
//! ## Error Cases
//! - `Publish`: the queue client failed to accept an outbound message.
//! - `Push`: the realtime channel failed to deliver a message. Always absorbed
//!   by the router and bridge; only surfaces from [`PushChannel`] calls.
//! - `Store`: the correlation store backend failed.
//! - `Serialize`: a typed message could not be turned into JSON.
//!
//! [`PushChannel`]: crate::PushChannel

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the relay core.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The queue rejected or never received a published message.
    #[error("Publish error: {context}")]
    Publish { context: String },

    /// The realtime channel could not deliver a message.
    #[error("Push error: {context}")]
    Push { context: String },

    /// The correlation store failed to read or write.
    #[error("Store error: {context}")]
    Store { context: String },

    /// An outbound message failed to serialize.
    #[error("Serialize error: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}
