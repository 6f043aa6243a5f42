//! # Result routing
//!
//! The [`ResultRouter`] consumes completions from the queue. For every valid
//! [`GenerationResult`] it first writes the client-visible
//! [`DeliveredResult`] to the correlation store, and only then tries to push
//! it to the requester over the realtime channel.
//!
//! The order matters: a client that is offline when the push happens (or whose
//! push fails) must still find its result through a lookup afterwards. Push is
//! therefore a detached, best-effort side effect whose failures are logged and
//! dropped.

use crate::{
    CorrelationStore, DeliveredResult, GenerationResult, Normalized, Payload, Result, normalize,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Realtime channel able to deliver messages to connected users.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Sends `message` to every connection of `user_id`.
    ///
    /// Succeeds even when the user has no live connection, if the underlying
    /// broker does.
    async fn send_to_user(&self, user_id: &str, message: &Value) -> Result<()>;

    /// Sends `message` to every connection on the channel.
    async fn broadcast(&self, message: &Value) -> Result<()>;
}

/// What [`ResultRouter::route`] did with a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The payload was absent or empty.
    Ignored,
    /// The payload was malformed and discarded.
    Dropped { reason: String },
    /// The result was written to the store.
    Stored {
        request_id: String,
        /// An entry for this request already existed (redelivery).
        replaced: bool,
        /// A push to the requester was started.
        pushed: bool,
    },
}

/// Records completed generations and notifies their requesters.
#[derive(Clone)]
pub struct ResultRouter {
    store: Arc<dyn CorrelationStore>,
    push: Option<Arc<dyn PushChannel>>,
}

impl ResultRouter {
    pub fn new(store: Arc<dyn CorrelationStore>, push: Option<Arc<dyn PushChannel>>) -> Self {
        Self { store, push }
    }

    pub fn store(&self) -> &Arc<dyn CorrelationStore> {
        &self.store
    }

    /// Routes one completion payload.
    ///
    /// Empty and malformed payloads are not errors: they are logged and
    /// reported through [`RouteOutcome`]. The push, when attempted, runs on a
    /// detached task and cannot affect the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store write fails.
    pub fn route(&self, raw: Option<Payload>) -> Result<RouteOutcome> {
        let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
            tracing::info!("ignored completion with empty payload");
            return Ok(RouteOutcome::Ignored);
        };

        let result = match normalize::<GenerationResult>(raw) {
            Normalized::Valid(result) => result,
            Normalized::Invalid(reason) => {
                tracing::warn!(%reason, "dropped malformed completion");
                return Ok(RouteOutcome::Dropped { reason });
            }
        };

        let delivered = result.delivered();
        let replaced = self.store.upsert(delivered.clone())?.is_some();
        tracing::info!(
            request_id = %delivered.request_id,
            image_id = %delivered.image_id,
            replaced,
            "stored generation result"
        );

        let pushed = self.spawn_push(result.u_id, delivered);

        Ok(RouteOutcome::Stored {
            request_id: result.request_id,
            replaced,
            pushed,
        })
    }

    fn spawn_push(&self, user_id: String, delivered: DeliveredResult) -> bool {
        let Some(push) = self.push.clone() else {
            return false;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%user_id, "no async runtime available, skipping push");
            return false;
        };
        let message = match serde_json::to_value(&delivered) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode result for push");
                return false;
            }
        };

        // May fail silently: the client recovers through a lookup.
        handle.spawn(async move {
            match push.send_to_user(&user_id, &message).await {
                Ok(()) => tracing::debug!(%user_id, request_id = %delivered.request_id, "pushed result"),
                Err(e) => tracing::warn!(
                    %user_id,
                    request_id = %delivered.request_id,
                    error = %e,
                    "push failed, result remains available for lookup"
                ),
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use crate::mock::{FailingPush, RecordingPush};
    use core::time::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn result_payload() -> Payload {
        Payload::from(json!({ "uId": "u1", "imageId": "img123", "requestId": "r1" }))
    }

    #[test]
    fn empty_payload_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let router = ResultRouter::new(store.clone(), None);

        assert_eq!(router.route(None).unwrap(), RouteOutcome::Ignored);
        assert_eq!(router.route(Some(Payload::from(""))).unwrap(), RouteOutcome::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let router = ResultRouter::new(store.clone(), None);

        let outcome = router.route(Some(Payload::from("{not json"))).unwrap();

        assert!(matches!(outcome, RouteOutcome::Dropped { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn stores_without_push_channel() {
        let store = Arc::new(MemoryStore::new());
        let router = ResultRouter::new(store.clone(), None);

        let outcome = router.route(Some(result_payload())).unwrap();

        assert_eq!(
            outcome,
            RouteOutcome::Stored {
                request_id: "r1".to_string(),
                replaced: false,
                pushed: false,
            }
        );
        assert_eq!(
            store.get("r1").unwrap(),
            Some(DeliveredResult {
                image_id: "img123".to_string(),
                request_id: "r1".to_string(),
            })
        );
    }

    #[test]
    fn redelivery_reports_replacement() {
        let router = ResultRouter::new(Arc::new(MemoryStore::new()), None);
        router.route(Some(result_payload())).unwrap();

        let outcome = router.route(Some(result_payload())).unwrap();

        assert!(matches!(outcome, RouteOutcome::Stored { replaced: true, .. }));
    }

    #[tokio::test]
    async fn pushes_stripped_result_to_requester() {
        let (push, mut rx) = RecordingPush::new();
        let router = ResultRouter::new(Arc::new(MemoryStore::new()), Some(Arc::new(push)));

        let outcome = router.route(Some(result_payload())).unwrap();
        assert!(matches!(outcome, RouteOutcome::Stored { pushed: true, .. }));

        let (user_id, message) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user_id.as_deref(), Some("u1"));
        assert_eq!(message, json!({ "imageId": "img123", "requestId": "r1" }));
    }

    #[tokio::test]
    async fn push_failure_keeps_result_stored() {
        let store = Arc::new(MemoryStore::new());
        let router = ResultRouter::new(store.clone(), Some(Arc::new(FailingPush)));

        let outcome = router.route(Some(result_payload())).unwrap();
        tokio::task::yield_now().await;

        assert!(matches!(outcome, RouteOutcome::Stored { pushed: true, .. }));
        assert!(store.get("r1").unwrap().is_some());
    }

    /// Holds every write back until a push has started, or for a short grace
    /// period when none does.
    struct GatedStore {
        inner: MemoryStore,
        push_started: Arc<AtomicBool>,
    }

    impl CorrelationStore for GatedStore {
        fn upsert(&self, result: DeliveredResult) -> Result<Option<DeliveredResult>> {
            let deadline = Instant::now() + Duration::from_millis(200);
            while !self.push_started.load(Ordering::Acquire) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.inner.upsert(result)
        }

        fn get(&self, request_id: &str) -> Result<Option<DeliveredResult>> {
            self.inner.get(request_id)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    /// Reports whether the pushed request was already stored when the push
    /// began.
    struct StoreCheckingPush {
        store: Arc<dyn CorrelationStore>,
        started: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<bool>,
    }

    #[async_trait]
    impl PushChannel for StoreCheckingPush {
        async fn send_to_user(&self, _user_id: &str, message: &Value) -> Result<()> {
            let request_id = message["requestId"].as_str().unwrap_or_default();
            let stored = self.store.get(request_id)?.is_some();
            self.started.store(true, Ordering::Release);
            let _ = self.tx.send(stored);
            Ok(())
        }

        async fn broadcast(&self, _message: &Value) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn result_is_stored_before_push_starts() {
        let started = Arc::new(AtomicBool::new(false));
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            push_started: Arc::clone(&started),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let push = StoreCheckingPush {
            store: store.clone(),
            started,
            tx,
        };
        let router = ResultRouter::new(store, Some(Arc::new(push)));

        // Off the worker threads, so a spawned push can run while the write
        // is still pending.
        let outcome = tokio::task::spawn_blocking(move || router.route(Some(result_payload())))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Stored { pushed: true, .. }));

        let stored = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(stored, "push observed the store before the result was written");
    }

    #[test]
    fn push_is_skipped_outside_runtime() {
        let (push, _rx) = RecordingPush::new();
        let store = Arc::new(MemoryStore::new());
        let router = ResultRouter::new(store.clone(), Some(Arc::new(push)));

        let outcome = router.route(Some(result_payload())).unwrap();

        assert!(matches!(outcome, RouteOutcome::Stored { pushed: false, .. }));
        assert!(store.get("r1").unwrap().is_some());
    }
}
