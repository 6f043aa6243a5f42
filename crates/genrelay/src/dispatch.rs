use crate::{Error, GenerationRequest, QueueMessage, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Client side of a topic-based pub/sub broker.
///
/// Implementations deliver at least once and give no ordering guarantees. A
/// returned `Ok` means the broker accepted the message, nothing more.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `message` to `topic` on the broker component `pubsub_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] if the broker could not be reached or
    /// rejected the message.
    async fn publish(&self, pubsub_name: &str, topic: &str, message: &Value) -> Result<()>;
}

/// Forwards generation requests to the work topic.
///
/// The dispatcher trusts its input: callers validate requests (see
/// [`normalize`](crate::normalize)) before handing them over. Publish failures
/// are returned as-is and never retried here.
#[derive(Clone)]
pub struct Dispatcher {
    publisher: Arc<dyn Publisher>,
    pubsub_name: String,
    topic: String,
}

impl Dispatcher {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        pubsub_name: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            pubsub_name: pubsub_name.into(),
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes one [`QueueMessage`] for `req` and returns it.
    ///
    /// The requester identity travels inside the message so the result can be
    /// pushed back to the right user once a worker completes it.
    #[tracing::instrument(
        skip_all,
        fields(requester_id = %req.requester_id, request_id = %req.request_id)
    )]
    pub async fn dispatch(&self, req: &GenerationRequest) -> Result<QueueMessage> {
        let message = QueueMessage::from(req);
        let body = serde_json::to_value(&message)?;

        match self
            .publisher
            .publish(&self.pubsub_name, &self.topic, &body)
            .await
        {
            Ok(()) => {
                tracing::info!(topic = %self.topic, "dispatched generation request");
                Ok(message)
            }
            Err(e) => {
                tracing::error!(topic = %self.topic, error = %e, "failed to dispatch generation request");
                Err(match e {
                    e @ Error::Publish { .. } => e,
                    other => Error::Publish {
                        context: other.to_string(),
                    },
                })
            }
        }
    }
}
