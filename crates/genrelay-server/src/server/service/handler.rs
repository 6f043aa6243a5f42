//! Shared service state and the plain HTTP routes.
//!
//! [`RelayService`] owns the core components (dispatcher, result router, event
//! bridge and lookup) wired to the broker clients. Handlers translate between
//! HTTP and those components and never hold business logic of their own.
//!
//! Status mapping:
//!
//! - Queue deliveries (`/newImage`) answer `200` for anything that should not
//!   be redelivered, including malformed and empty payloads, and `500` with
//!   `{"status":"DROP"}` when the result could not be recorded.
//! - Lookups answer `400` for a missing id and `404` for an unknown one.

use crate::server::{
    broker::webpubsub::{ClientAccess, WebPubSubClient},
    config::{QueueConfig, ServerConfig},
    telemetry::{
        increment_dispatch_errors, increment_duplicate_results, increment_requests_dispatched,
        record_lookup, record_route_duration, record_route_outcome,
    },
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use genrelay::{
    BridgeOutcome, CorrelationStore, DeliveredResult, Dispatcher, EventBridge, GenerationRequest,
    Lookup, LookupError, Payload, Publisher, PushChannel, QueueMessage, ResultRouter,
    RouteOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

const TEST_PROMPT: &str = "A duck flying in the sky";
const TEST_ID: &str = "test";

/// Application state shared by every handler.
#[derive(Clone)]
pub struct RelayService {
    hub: String,
    queue: QueueConfig,
    webpubsub: WebPubSubClient,
    store: Arc<dyn CorrelationStore>,
    dispatcher: Dispatcher,
    router: ResultRouter,
    bridge: EventBridge,
    lookup: Lookup,
}

impl RelayService {
    /// Wires the core components to `store`, `publisher` and the Web PubSub
    /// client, which also serves as the push channel.
    pub fn new(
        config: &ServerConfig,
        store: Arc<dyn CorrelationStore>,
        publisher: Arc<dyn Publisher>,
        webpubsub: WebPubSubClient,
    ) -> Self {
        let push: Arc<dyn PushChannel> = Arc::new(webpubsub.clone());
        let dispatcher = Dispatcher::new(publisher, &config.queue.name, &config.queue.work_topic);

        Self {
            hub: config.hub.clone(),
            queue: config.queue.clone(),
            webpubsub,
            router: ResultRouter::new(Arc::clone(&store), Some(Arc::clone(&push))),
            bridge: EventBridge::new(dispatcher.clone(), Some(push)),
            lookup: Lookup::new(Arc::clone(&store)),
            dispatcher,
            store,
        }
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    pub fn webpubsub(&self) -> &WebPubSubClient {
        &self.webpubsub
    }

    pub(crate) fn on_connect(&self, user_id: &str) {
        self.bridge.on_connect(user_id);
    }

    pub(crate) async fn on_user_message(
        &self,
        user_id: &str,
        event_name: &str,
        raw: Payload,
    ) -> genrelay::Result<BridgeOutcome> {
        let result = self.bridge.on_user_message(user_id, event_name, raw).await;
        match result {
            Ok(BridgeOutcome::Dispatched(_)) => increment_requests_dispatched(),
            Ok(_) => {}
            Err(_) => increment_dispatch_errors(),
        }
        result
    }

    async fn dispatch(&self, req: &GenerationRequest) -> genrelay::Result<QueueMessage> {
        let result = self.dispatcher.dispatch(req).await;
        match result {
            Ok(_) => increment_requests_dispatched(),
            Err(_) => increment_dispatch_errors(),
        }
        result
    }
}

/// Error responses produced by the HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The message was not handled. The broker may redeliver it.
    Drop,
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Drop => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "DROP" })),
            )
                .into_response(),
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
        }
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::MissingIdentifier => Self::BadRequest(err.to_string()),
            LookupError::NotFound { .. } => Self::NotFound(err.to_string()),
            LookupError::Store { .. } => Self::Internal(err.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TestQuery {
    prompt: Option<String>,
    #[serde(rename = "rId")]
    r_id: Option<String>,
}

/// `GET /test`: dispatches a canned request on behalf of the `test` user.
pub async fn test_request(
    State(service): State<RelayService>,
    Query(query): Query<TestQuery>,
) -> Result<&'static str, ApiError> {
    let prompt = query
        .prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| TEST_PROMPT.to_string());
    let request_id = query
        .r_id
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| TEST_ID.to_string());

    let request = GenerationRequest::new(TEST_ID, request_id, prompt);
    service.dispatch(&request).await.map_err(|_| ApiError::Drop)?;
    Ok("OK")
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    #[serde(rename = "rId")]
    r_id: Option<String>,
}

/// `GET /lookup?rId=`
pub async fn lookup(
    State(service): State<RelayService>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<DeliveredResult>, ApiError> {
    let request_id = query.r_id.unwrap_or_default();
    match service.lookup.lookup(&request_id) {
        Ok(result) => {
            record_lookup("found");
            Ok(Json(result))
        }
        Err(err) => {
            record_lookup(match err {
                LookupError::MissingIdentifier => "missing_id",
                LookupError::NotFound { .. } => "not_found",
                LookupError::Store { .. } => "error",
            });
            Err(err.into())
        }
    }
}

/// `POST /newImage`: a completion delivered by the queue subscription.
///
/// The body is read as raw bytes so that the content type the broker chose
/// (plain JSON, CloudEvents JSON or text) does not matter.
pub async fn new_image(
    State(service): State<RelayService>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let start = Instant::now();
    let outcome = service.router.route(Payload::from_envelope(&body));
    record_route_duration(start.elapsed().as_secs_f64() * 1000.0);

    match outcome {
        Ok(RouteOutcome::Ignored) => record_route_outcome("ignored"),
        Ok(RouteOutcome::Dropped { .. }) => record_route_outcome("dropped"),
        Ok(RouteOutcome::Stored { replaced, .. }) => {
            record_route_outcome("stored");
            if replaced {
                increment_duplicate_results();
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to record generation result");
            record_route_outcome("failed");
            return Err(ApiError::Drop);
        }
    }
    Ok("OK")
}

/// Programmatic subscription returned to the Dapr sidecar at startup.
#[derive(Debug, Serialize)]
pub struct Subscription {
    pubsubname: String,
    topic: String,
    route: &'static str,
}

/// `GET /dapr/subscribe`
pub async fn dapr_subscribe(State(service): State<RelayService>) -> Json<Vec<Subscription>> {
    Json(vec![Subscription {
        pubsubname: service.queue.name.clone(),
        topic: service.queue.completion_topic.clone(),
        route: "/newImage",
    }])
}

/// `GET /negotiate`: issues a WebSocket URL for a fresh user id.
pub async fn negotiate(
    State(service): State<RelayService>,
) -> Result<Json<ClientAccess>, ApiError> {
    let user_id = uuid::Uuid::new_v4().to_string();
    let access = service.webpubsub.client_access(&user_id).map_err(|e| {
        tracing::error!(error = %e, "failed to issue client access token");
        ApiError::Internal("failed to issue client access token".to_string())
    })?;
    tracing::info!(%user_id, "issued client access token");
    Ok(Json(access))
}

/// `GET /healthz`
pub async fn healthz(State(service): State<RelayService>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "storedResults": service.store.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service::mock::{
        RecordingPublisher, body_json, body_text, service, service_with_endpoint,
    };
    use crate::server::service::router;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn get(app: axum::Router, uri: &str) -> Response {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post(app: axum::Router, uri: &str, content_type: &str, body: &str) -> Response {
        app.oneshot(
            Request::post(uri)
                .header("content-type", content_type)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_route_dispatches_defaults() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (relay, _) = service(publisher.clone());

        let response = get(router(relay), "/test").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "queue");
        assert_eq!(published[0].1, "to-generate");
        assert_eq!(
            published[0].2,
            json!({ "uId": "test", "input": "A duck flying in the sky", "rId": "test" })
        );
    }

    #[tokio::test]
    async fn test_route_uses_query_parameters() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (relay, _) = service(publisher.clone());

        let response = get(router(relay), "/test?prompt=cat&rId=r9").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            publisher.published()[0].2,
            json!({ "uId": "test", "input": "cat", "rId": "r9" })
        );
    }

    #[tokio::test]
    async fn test_route_reports_publish_failure() {
        let (relay, _) = service(Arc::new(RecordingPublisher::failing()));

        let response = get(router(relay), "/test").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({ "status": "DROP" }));
    }

    #[tokio::test]
    async fn lookup_status_mapping() {
        let (relay, store) = service(Arc::new(RecordingPublisher::default()));
        store
            .upsert(DeliveredResult {
                image_id: "img123".to_string(),
                request_id: "r1".to_string(),
            })
            .unwrap();
        let app = router(relay);

        let response = get(app.clone(), "/lookup").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(app.clone(), "/lookup?rId=").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(app.clone(), "/lookup?rId=unknown").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(app, "/lookup?rId=r1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "imageId": "img123", "requestId": "r1" })
        );
    }

    #[tokio::test]
    async fn new_image_accepts_cloudevent_envelope() {
        let (relay, store) = service(Arc::new(RecordingPublisher::default()));
        let app = router(relay);
        let envelope = json!({
            "specversion": "1.0",
            "type": "com.dapr.event.sent",
            "topic": "generated",
            "data": { "uId": "u1", "imageId": "img123", "requestId": "r1" }
        });

        let response = post(
            app.clone(),
            "/newImage",
            "application/cloudevents+json",
            &envelope.to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
        assert_eq!(
            store.get("r1").unwrap(),
            Some(DeliveredResult {
                image_id: "img123".to_string(),
                request_id: "r1".to_string(),
            })
        );

        let response = get(app, "/lookup?rId=r1").await;
        let body: Value = body_json(response).await;
        assert!(body.get("uId").is_none());
    }

    #[tokio::test]
    async fn new_image_accepts_string_encoded_data() {
        let (relay, store) = service(Arc::new(RecordingPublisher::default()));
        let data = json!({ "uId": "u1", "imageId": "img7", "requestId": "r7" }).to_string();
        let envelope = json!({ "data": data });

        let response = post(
            router(relay),
            "/newImage",
            "application/json",
            &envelope.to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.get("r7").unwrap().unwrap().image_id, "img7");
    }

    #[tokio::test]
    async fn new_image_acknowledges_poison_messages() {
        let (relay, store) = service(Arc::new(RecordingPublisher::default()));
        let app = router(relay);

        for body in ["", "{not json", r#"{"data": null}"#, r#"{"data": {"uId": "u1"}}"#] {
            let response = post(app.clone(), "/newImage", "text/plain", body).await;
            assert_eq!(response.status(), StatusCode::OK, "body: {body}");
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn stored_result_is_pushed_to_requester() {
        use wiremock::matchers::{body_json as json_body, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/hubs/imagesgen/users/u1/:send"))
            .and(json_body(json!({ "imageId": "img123", "requestId": "r1" })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let (relay, _) =
            service_with_endpoint(Arc::new(RecordingPublisher::default()), &server.uri());
        let body = json!({ "data": { "uId": "u1", "imageId": "img123", "requestId": "r1" } });

        let response = post(router(relay), "/newImage", "application/json", &body.to_string()).await;
        assert_eq!(response.status(), StatusCode::OK);

        for _ in 0..50 {
            if !server.received_requests().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(core::time::Duration::from_millis(20)).await;
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn subscription_points_completion_topic_at_new_image() {
        let (relay, _) = service(Arc::new(RecordingPublisher::default()));

        let response = get(router(relay), "/dapr/subscribe").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!([{ "pubsubname": "queue", "topic": "generated", "route": "/newImage" }])
        );
    }

    #[tokio::test]
    async fn negotiate_issues_fresh_identity() {
        let (relay, _) = service(Arc::new(RecordingPublisher::default()));
        let app = router(relay);

        let first = body_json(get(app.clone(), "/negotiate").await).await;
        let second = body_json(get(app, "/negotiate").await).await;

        let id = first["id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        assert_ne!(first["id"], second["id"]);
        assert!(
            first["url"]
                .as_str()
                .unwrap()
                .starts_with("ws://127.0.0.1:9/client/hubs/imagesgen?access_token=")
        );
    }

    #[tokio::test]
    async fn healthz_reports_store_size() {
        let (relay, store) = service(Arc::new(RecordingPublisher::default()));
        store
            .upsert(DeliveredResult {
                image_id: "img1".to_string(),
                request_id: "r1".to_string(),
            })
            .unwrap();

        let response = get(router(relay), "/healthz").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "status": "ok", "storedResults": 1 })
        );
    }
}
