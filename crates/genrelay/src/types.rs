//! # Wire and domain types
//!
//! Every payload that crosses the relay has a typed counterpart here. JSON
//! field names follow the wire contract shared with clients and queue workers
//! (`uId`, `rId`, `imageId`, `requestId`), while the Rust fields use the usual
//! snake case.
//!
//! - [`ClientRequest`] - what a client sends over the realtime channel.
//! - [`GenerationRequest`] - a client request bound to the requester identity.
//! - [`QueueMessage`] - the message published to the work topic.
//! - [`GenerationResult`] - what a worker publishes on the completion topic.
//! - [`DeliveredResult`] - the client-visible record kept in the store.

use crate::payload::Validate;
use serde::{Deserialize, Serialize};

/// Body of a `message` event sent by a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    pub prompt: String,
    pub request_id: String,
}

impl Validate for ClientRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("requestId", &self.request_id)?;
        require_non_empty("prompt", &self.prompt)
    }
}

/// A prompt submitted by a known requester.
///
/// `request_id` is chosen by the client and is the only correlation key. The
/// relay assumes clients keep it unique and does not check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub requester_id: String,
    pub request_id: String,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(
        requester_id: impl Into<String>,
        request_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            requester_id: requester_id.into(),
            request_id: request_id.into(),
            prompt: prompt.into(),
        }
    }

    /// Binds a client request to the user the broker reported for it.
    pub fn from_client(requester_id: impl Into<String>, req: ClientRequest) -> Self {
        Self {
            requester_id: requester_id.into(),
            request_id: req.request_id,
            prompt: req.prompt,
        }
    }
}

/// Outbound message published to the work topic.
///
/// `u_id` is captured at dispatch time because the worker echoes it back in
/// its [`GenerationResult`], which is the only way the router learns whom to
/// push to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub u_id: String,
    pub input: String,
    pub r_id: String,
}

impl From<&GenerationRequest> for QueueMessage {
    fn from(req: &GenerationRequest) -> Self {
        Self {
            u_id: req.requester_id.clone(),
            input: req.prompt.clone(),
            r_id: req.request_id.clone(),
        }
    }
}

/// Completion published by a worker. May arrive more than once and in any
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub u_id: String,
    pub image_id: String,
    pub request_id: String,
}

impl GenerationResult {
    /// Projects the client-visible part of the result, dropping the
    /// requester identity.
    pub fn delivered(&self) -> DeliveredResult {
        DeliveredResult {
            image_id: self.image_id.clone(),
            request_id: self.request_id.clone(),
        }
    }
}

impl Validate for GenerationResult {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("requestId", &self.request_id)?;
        require_non_empty("imageId", &self.image_id)?;
        require_non_empty("uId", &self.u_id)
    }
}

/// The record stored per request and returned by lookups.
///
/// Has no requester field, so a routing identity can never leak to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredResult {
    pub image_id: String,
    pub request_id: String,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("`{field}` must not be empty"))
    } else {
        Ok(())
    }
}
