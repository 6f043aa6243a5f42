//! Web PubSub event handler webhook.
//!
//! The service delivers client events as CloudEvents in HTTP binary mode: the
//! event attributes travel in `ce-*` headers and the client's message is the
//! request body. Before sending any event, the service validates the webhook
//! with an `OPTIONS` request carrying `WebHook-Request-Origin`.

use super::handler::{ApiError, RelayService};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use genrelay::{BridgeOutcome, Payload};
use serde_json::{Value, json};

const REQUEST_ORIGIN: &str = "webhook-request-origin";
const ALLOWED_ORIGIN: &str = "webhook-allowed-origin";

const CE_TYPE: &str = "ce-type";
const CE_HUB: &str = "ce-hub";
const CE_USER_ID: &str = "ce-userid";
const CE_EVENT_NAME: &str = "ce-eventname";

const SYS_CONNECT: &str = "azure.webpubsub.sys.connect";
const SYS_CONNECTED: &str = "azure.webpubsub.sys.connected";
const SYS_DISCONNECTED: &str = "azure.webpubsub.sys.disconnected";
const USER_EVENT_PREFIX: &str = "azure.webpubsub.user.";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

/// `OPTIONS /eventhandler`: abuse protection handshake.
///
/// Only the Web PubSub instance named in the connection string is allowed to
/// deliver events.
pub async fn abuse_protection(State(service): State<RelayService>, headers: HeaderMap) -> Response {
    let expected = service.webpubsub().connection().host();
    let Some(origins) = header_str(&headers, REQUEST_ORIGIN) else {
        return bad_request("missing WebHook-Request-Origin header");
    };

    let allowed = origins
        .split(',')
        .map(str::trim)
        .any(|origin| origin.eq_ignore_ascii_case(expected));
    if !allowed {
        tracing::warn!(%origins, "refused webhook validation from unknown origin");
        return bad_request("origin not allowed");
    }

    match HeaderValue::from_str(expected) {
        Ok(value) => {
            let mut response = StatusCode::OK.into_response();
            response.headers_mut().insert(ALLOWED_ORIGIN, value);
            response
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn user_payload(headers: &HeaderMap, body: &Bytes) -> Payload {
    let is_json = header_str(headers, header::CONTENT_TYPE.as_str())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if is_json {
        if let Ok(value) = serde_json::from_slice::<Value>(body) {
            return Payload::Structured(value);
        }
    }
    Payload::from_bytes(body)
}

/// `POST /eventhandler`: one CloudEvent from Web PubSub.
pub async fn handle_event(
    State(service): State<RelayService>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let hub_matches =
        header_str(&headers, CE_HUB).is_some_and(|hub| hub.eq_ignore_ascii_case(service.hub()));
    if !hub_matches {
        tracing::warn!(hub = ?header_str(&headers, CE_HUB), "event for unknown hub");
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(event_type) = header_str(&headers, CE_TYPE) else {
        return bad_request("missing ce-type header");
    };
    let user_id = header_str(&headers, CE_USER_ID);

    match event_type {
        SYS_CONNECT => Json(json!({})).into_response(),
        SYS_CONNECTED => {
            if let Some(user_id) = user_id {
                service.on_connect(user_id);
            }
            StatusCode::OK.into_response()
        }
        SYS_DISCONNECTED => {
            tracing::info!(user_id = ?user_id, "user disconnected");
            StatusCode::OK.into_response()
        }
        user_event if user_event.starts_with(USER_EVENT_PREFIX) => {
            let Some(user_id) = user_id else {
                return bad_request("missing ce-userId header");
            };
            let event_name = header_str(&headers, CE_EVENT_NAME)
                .unwrap_or(&user_event[USER_EVENT_PREFIX.len()..]);

            match service
                .on_user_message(user_id, event_name, user_payload(&headers, &body))
                .await
            {
                Ok(BridgeOutcome::Rejected { reason }) => {
                    tracing::debug!(%user_id, %reason, "acknowledged rejected message");
                    StatusCode::OK.into_response()
                }
                Ok(_) => StatusCode::OK.into_response(),
                Err(e) => {
                    tracing::error!(%user_id, error = %e, "failed to dispatch client message");
                    ApiError::Drop.into_response()
                }
            }
        }
        other => {
            tracing::debug!(event_type = %other, "ignored event");
            StatusCode::OK.into_response()
        }
    }
}
