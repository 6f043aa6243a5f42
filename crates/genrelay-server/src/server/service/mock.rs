use super::handler::RelayService;
use crate::server::broker::{http_client, webpubsub::WebPubSubClient};
use crate::server::config::{CliArgs, ServerConfig};
use async_trait::async_trait;
use axum::response::Response;
use clap::Parser;
use core::time::Duration;
use genrelay::{Error, MemoryStore, Publisher, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Web PubSub endpoint nothing listens on, so pushes fail fast.
pub const UNREACHABLE_ENDPOINT: &str = "http://127.0.0.1:9";

/// Records every publish as `(pubsub_name, topic, message)`.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String, Value)>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, String, Value)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, pubsub_name: &str, topic: &str, message: &Value) -> Result<()> {
        if self.fail {
            return Err(Error::Publish {
                context: "sidecar unavailable".to_string(),
            });
        }
        self.published.lock().push((
            pubsub_name.to_string(),
            topic.to_string(),
            message.clone(),
        ));
        Ok(())
    }
}

pub fn config(endpoint: &str) -> ServerConfig {
    let qs = format!("Endpoint={endpoint};AccessKey=dGVzdC1rZXk=;Version=1.0;");
    let args = CliArgs::try_parse_from([
        "genrelay-server",
        "--wps-qs",
        qs.as_str(),
        "--hub-name",
        "imagesgen",
        "--queue-name",
        "queue",
        "--queue-topic-to-generate",
        "to-generate",
        "--queue-topic-generated",
        "generated",
        "--result-ttl-secs",
        "0",
        "--request-timeout-secs",
        "10",
    ])
    .unwrap();
    ServerConfig::try_from(args).unwrap()
}

pub fn service_with_endpoint(
    publisher: Arc<RecordingPublisher>,
    endpoint: &str,
) -> (RelayService, Arc<MemoryStore>) {
    let config = config(endpoint);
    let store = Arc::new(MemoryStore::new());
    let webpubsub = WebPubSubClient::new(
        http_client(Duration::from_secs(1)).unwrap(),
        config.webpubsub.clone(),
        config.hub.clone(),
    );
    let relay = RelayService::new(&config, store.clone(), publisher, webpubsub);
    (relay, store)
}

pub fn service(publisher: Arc<RecordingPublisher>) -> (RelayService, Arc<MemoryStore>) {
    service_with_endpoint(publisher, UNREACHABLE_ENDPOINT)
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
