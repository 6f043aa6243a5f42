//! Test doubles for the broker seams.

use crate::{Error, Publisher, PushChannel, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub pubsub_name: String,
    pub topic: String,
    pub message: Value,
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, pubsub_name: &str, topic: &str, message: &Value) -> Result<()> {
        self.published.lock().push(Published {
            pubsub_name: pubsub_name.to_string(),
            topic: topic.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}

pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, _pubsub_name: &str, _topic: &str, _message: &Value) -> Result<()> {
        Err(Error::Publish {
            context: "sidecar unavailable".to_string(),
        })
    }
}

/// Forwards every push to a channel. Broadcasts carry no user id.
pub struct RecordingPush {
    tx: mpsc::UnboundedSender<(Option<String>, Value)>,
}

impl RecordingPush {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Option<String>, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PushChannel for RecordingPush {
    async fn send_to_user(&self, user_id: &str, message: &Value) -> Result<()> {
        let _ = self.tx.send((Some(user_id.to_string()), message.clone()));
        Ok(())
    }

    async fn broadcast(&self, message: &Value) -> Result<()> {
        let _ = self.tx.send((None, message.clone()));
        Ok(())
    }
}

pub struct FailingPush;

#[async_trait]
impl PushChannel for FailingPush {
    async fn send_to_user(&self, user_id: &str, _message: &Value) -> Result<()> {
        Err(Error::Push {
            context: format!("user {user_id} is not connected"),
        })
    }

    async fn broadcast(&self, _message: &Value) -> Result<()> {
        Err(Error::Push {
            context: "hub unavailable".to_string(),
        })
    }
}
