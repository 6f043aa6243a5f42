use super::encode_segment;
use async_trait::async_trait;
use genrelay::{Error, Publisher, Result};
use serde_json::Value;

/// Publishes to a Dapr pub/sub component through the sidecar's HTTP API.
///
/// Dapr wraps the JSON body in a CloudEvent and hands it to the configured
/// broker. A 2xx answer only means the sidecar accepted the message.
#[derive(Clone)]
pub struct DaprPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl DaprPublisher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn publish_url(&self, pubsub_name: &str, topic: &str) -> String {
        format!(
            "{}/v1.0/publish/{}/{}",
            self.base_url,
            encode_segment(pubsub_name),
            encode_segment(topic)
        )
    }
}

#[async_trait]
impl Publisher for DaprPublisher {
    async fn publish(&self, pubsub_name: &str, topic: &str, message: &Value) -> Result<()> {
        let url = self.publish_url(pubsub_name, topic);
        let response = self
            .client
            .post(&url)
            .json(message)
            .send()
            .await
            .map_err(|e| Error::Publish {
                context: format!("request to Dapr sidecar failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(%pubsub_name, %topic, "published message");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Publish {
            context: format!("Dapr sidecar answered {status}: {body}"),
        })
    }
}
