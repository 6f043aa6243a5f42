//! # Payload normalization
//!
//! Everything the relay receives from the outside world (client messages,
//! queue deliveries) arrives either as raw text or as JSON that a transport
//! already parsed. [`normalize`] is the single boundary that turns such input
//! into a typed value or an [`Normalized::Invalid`] sentinel. Business logic
//! never inspects raw shapes.
//!
//! Normalization never panics and never returns an error: callers are expected
//! to log and drop invalid input.
//!
//! ## Rules
//!
//! - Text is parsed as JSON first.
//! - A JSON string whose content is itself JSON is unwrapped once. Queue
//!   brokers commonly deliver a serialized body inside a string field.
//! - The value must deserialize into `T` (missing fields are rejected).
//! - `T::validate` must accept it (blank required fields are rejected).

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Untrusted input in whichever form the transport produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw text that still needs to be parsed.
    Text(String),
    /// JSON that has already been parsed.
    Structured(Value),
}

impl Payload {
    /// Wraps a raw body, replacing invalid UTF-8 sequences.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::Text(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Returns `true` for blank text, JSON `null` and blank JSON strings.
    ///
    /// Queue systems may deliver such marker events; they are not malformed,
    /// just meaningless.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Structured(Value::Null) => true,
            Self::Structured(Value::String(text)) => text.trim().is_empty(),
            Self::Structured(_) => false,
        }
    }

    /// Extracts the payload carried by a queue delivery body.
    ///
    /// Pub/sub brokers wrap published data in an event envelope whose `data`
    /// field holds the original message. Bodies without a `data` field are
    /// taken as the message itself, and bodies that are not JSON at all are
    /// passed on as text so that normalization can reject them.
    ///
    /// Returns `None` when there is nothing to route.
    pub fn from_envelope(body: &[u8]) -> Option<Self> {
        let payload = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(mut map)) => match map.remove("data") {
                Some(data) => Self::Structured(data),
                None => Self::Structured(Value::Object(map)),
            },
            Ok(other) => Self::Structured(other),
            Err(_) => Self::from_bytes(body),
        };
        (!payload.is_empty()).then_some(payload)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Outcome of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized<T> {
    /// The input parsed and passed validation.
    Valid(T),
    /// The input was rejected. Carries a human-readable reason for logs.
    Invalid(String),
}

impl<T> Normalized<T> {
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Converts into an `Option`, discarding the rejection reason.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Valid(value) => Some(value),
            Self::Invalid(_) => None,
        }
    }
}

/// Semantic checks applied after a payload has the right shape.
pub trait Validate {
    /// Returns a reason when the value must be rejected.
    fn validate(&self) -> Result<(), String>;
}

/// Converts untrusted input into `T`, or explains why it cannot.
pub fn normalize<T>(raw: Payload) -> Normalized<T>
where
    T: DeserializeOwned + Validate,
{
    let value = match raw {
        Payload::Structured(value) => value,
        Payload::Text(text) => match serde_json::from_str::<Value>(&text) {
            Ok(value) => value,
            Err(e) => return Normalized::Invalid(format!("not valid JSON: {e}")),
        },
    };

    let value = match value {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(value) => value,
            Err(e) => return Normalized::Invalid(format!("string payload is not JSON: {e}")),
        },
        value => value,
    };

    let typed = match serde_json::from_value::<T>(value) {
        Ok(typed) => typed,
        Err(e) => return Normalized::Invalid(format!("unexpected shape: {e}")),
    };

    match typed.validate() {
        Ok(()) => Normalized::Valid(typed),
        Err(reason) => Normalized::Invalid(reason),
    }
}
