use crate::{
    ClientRequest, Dispatcher, GenerationRequest, Normalized, Payload, PushChannel, QueueMessage,
    Result, normalize,
};
use serde_json::json;
use std::sync::Arc;

/// Event name a client uses to submit a prompt.
pub const MESSAGE_EVENT: &str = "message";

/// What [`EventBridge::on_user_message`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The event is not one the relay handles.
    Ignored,
    /// The event body was not a valid request and nothing was dispatched.
    Rejected { reason: String },
    /// The request was published to the work queue.
    Dispatched(QueueMessage),
}

/// Hooks invoked by the realtime broker's event webhook.
///
/// The broker decides when these fire. Accepting a client message and
/// dispatching it are decoupled: an invalid message is dropped without the
/// broker handshake failing.
#[derive(Clone)]
pub struct EventBridge {
    dispatcher: Dispatcher,
    push: Option<Arc<dyn PushChannel>>,
}

impl EventBridge {
    pub fn new(dispatcher: Dispatcher, push: Option<Arc<dyn PushChannel>>) -> Self {
        Self { dispatcher, push }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Announces a newly connected user to everyone on the channel.
    ///
    /// Fire-and-forget: the broadcast runs detached and its failure is only
    /// logged. Returns whether a broadcast was started.
    pub fn on_connect(&self, user_id: &str) -> bool {
        tracing::info!(%user_id, "user connected");
        let Some(push) = self.push.clone() else {
            return false;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };

        let user_id = user_id.to_owned();
        handle.spawn(async move {
            let notice = json!({ "type": "userJoined", "userId": user_id });
            if let Err(e) = push.broadcast(&notice).await {
                tracing::warn!(%user_id, error = %e, "failed to broadcast join notice");
            }
        });
        true
    }

    /// Handles a user event carrying `raw` as its body.
    ///
    /// Only [`MESSAGE_EVENT`] is acted upon. Its body must normalize into a
    /// [`ClientRequest`], which is dispatched on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns the dispatcher's error when publishing fails. Validation
    /// failures are reported as [`BridgeOutcome::Rejected`].
    pub async fn on_user_message(
        &self,
        user_id: &str,
        event_name: &str,
        raw: Payload,
    ) -> Result<BridgeOutcome> {
        if event_name != MESSAGE_EVENT {
            tracing::debug!(%user_id, %event_name, "ignored user event");
            return Ok(BridgeOutcome::Ignored);
        }

        let request = match normalize::<ClientRequest>(raw) {
            Normalized::Valid(request) => request,
            Normalized::Invalid(reason) => {
                tracing::warn!(%user_id, %reason, "rejected malformed client message");
                return Ok(BridgeOutcome::Rejected { reason });
            }
        };

        let request = GenerationRequest::from_client(user_id, request);
        let message = self.dispatcher.dispatch(&request).await?;
        Ok(BridgeOutcome::Dispatched(message))
    }
}
