//! Azure Web PubSub REST client.
//!
//! Calls are authenticated with short-lived HS256 tokens signed by the access
//! key from the connection string. The token audience is the URL being called
//! with any port removed; client tokens use the hub's client endpoint instead.

use super::encode_segment;
use crate::server::{config::WebPubSubConnection, telemetry::increment_push_failures};
use async_trait::async_trait;
use genrelay::{Error, PushChannel, Result};
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

const API_VERSION: &str = "2024-01-01";

/// Lifetime of every token minted by this client.
const TOKEN_TTL_SECS: u64 = 3600;

#[derive(Serialize)]
struct Claims<'a> {
    aud: &'a str,
    iat: u64,
    exp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
}

/// Connection details handed to a client so it can open a WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientAccess {
    pub url: String,
    pub id: String,
}

/// `url` with any explicit port removed from its authority.
fn without_port(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let (authority, path) = rest.find('/').map_or((rest, ""), |i| rest.split_at(i));
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    };
    format!("{scheme}://{host}{path}")
}

#[derive(Clone)]
pub struct WebPubSubClient {
    client: reqwest::Client,
    connection: WebPubSubConnection,
    hub: String,
    key: EncodingKey,
}

impl WebPubSubClient {
    pub fn new(
        client: reqwest::Client,
        connection: WebPubSubConnection,
        hub: impl Into<String>,
    ) -> Self {
        let key = EncodingKey::from_secret(connection.access_key.as_bytes());
        Self {
            client,
            connection,
            hub: hub.into(),
            key,
        }
    }

    pub fn connection(&self) -> &WebPubSubConnection {
        &self.connection
    }

    fn sign(&self, audience: &str, subject: Option<&str>) -> jsonwebtoken::errors::Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let claims = Claims {
            aud: audience,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            sub: subject,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.key)
    }

    fn hub_url(&self) -> String {
        format!(
            "{}/api/hubs/{}",
            self.connection.endpoint,
            encode_segment(&self.hub)
        )
    }

    /// Issues a WebSocket URL for `user_id`, valid for one hour.
    pub fn client_access(&self, user_id: &str) -> jsonwebtoken::errors::Result<ClientAccess> {
        let hub = encode_segment(&self.hub);
        let audience = without_port(&format!(
            "{}/client/hubs/{hub}",
            self.connection.endpoint
        ));
        let token = self.sign(&audience, Some(user_id))?;
        Ok(ClientAccess {
            url: format!(
                "{}/client/hubs/{hub}?access_token={token}",
                self.connection.client_endpoint()
            ),
            id: user_id.to_owned(),
        })
    }

    async fn send(&self, url: String, message: &Value) -> Result<()> {
        let token = self.sign(&without_port(&url), None).map_err(|e| Error::Push {
            context: format!("failed to sign service token: {e}"),
        })?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(message)
            .send()
            .await
            .map_err(|e| Error::Push {
                context: format!("request to Web PubSub failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Push {
            context: format!("Web PubSub answered {status}: {body}"),
        })
    }
}

#[async_trait]
impl PushChannel for WebPubSubClient {
    async fn send_to_user(&self, user_id: &str, message: &Value) -> Result<()> {
        let url = format!(
            "{}/users/{}/:send?api-version={API_VERSION}",
            self.hub_url(),
            encode_segment(user_id)
        );
        let result = self.send(url, message).await;
        if result.is_err() {
            increment_push_failures();
        }
        result
    }

    async fn broadcast(&self, message: &Value) -> Result<()> {
        let url = format!("{}/:send?api-version={API_VERSION}", self.hub_url());
        let result = self.send(url, message).await;
        if result.is_err() {
            increment_push_failures();
        }
        result
    }
}
