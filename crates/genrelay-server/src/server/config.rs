use anyhow::{Context, bail};
use clap::Parser;
use core::fmt;
use core::str::FromStr;
use core::time::Duration;

/// Runtime configuration for the `genrelay-server` binary.
///
/// Every value can be given as a CLI flag or an environment variable (a
/// `.env` file in the working directory is loaded first). Defaults match a
/// local Dapr sidecar next to a single relay instance.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "genrelay-server",
    version,
    about = "Relays image generation prompts from Web PubSub clients to a Dapr queue and results back"
)]
pub struct CliArgs {
    /// Address to bind the HTTP listener to.
    ///
    /// Environment variable: `HOST`
    #[arg(long, env = "HOST", default_value_t = String::from("0.0.0.0"))]
    pub host: String,

    /// Port for the HTTP listener.
    ///
    /// Environment variable: `PORT`
    #[arg(long, env = "PORT", default_value_t = 8081)]
    pub port: u16,

    /// Web PubSub hub the relay serves. Events for other hubs are refused.
    ///
    /// Environment variable: `HUB_NAME`
    #[arg(long, env = "HUB_NAME", default_value_t = String::from("imagesgen"))]
    pub hub_name: String,

    /// Web PubSub connection string
    /// (`Endpoint=https://...;AccessKey=...;Version=1.0;`).
    ///
    /// Required. The server refuses to start without it.
    ///
    /// Environment variable: `WPS_QS`
    #[arg(long, env = "WPS_QS", hide_env_values = true)]
    pub wps_qs: Option<String>,

    /// Name of the Dapr pub/sub component.
    ///
    /// Environment variable: `QUEUE_NAME`
    #[arg(long, env = "QUEUE_NAME", default_value_t = String::from("queue"))]
    pub queue_name: String,

    /// Topic generation requests are published to.
    ///
    /// Environment variable: `QUEUE_TOPIC_TO_GENERATE`
    #[arg(long, env = "QUEUE_TOPIC_TO_GENERATE", default_value_t = String::from("to-generate"))]
    pub queue_topic_to_generate: String,

    /// Topic workers publish completed images to. The relay subscribes to it.
    ///
    /// Environment variable: `QUEUE_TOPIC_GENERATED`
    #[arg(long, env = "QUEUE_TOPIC_GENERATED", default_value_t = String::from("generated"))]
    pub queue_topic_generated: String,

    /// Host of the Dapr sidecar HTTP API.
    ///
    /// Environment variable: `DAPR_HOST`
    #[arg(long, env = "DAPR_HOST", default_value_t = String::from("127.0.0.1"))]
    pub dapr_host: String,

    /// Port of the Dapr sidecar HTTP API. Set by `dapr run`.
    ///
    /// Environment variable: `DAPR_HTTP_PORT`
    #[arg(long, env = "DAPR_HTTP_PORT", default_value_t = 3500)]
    pub dapr_http_port: u16,

    /// How long delivered results stay retrievable, in seconds.
    ///
    /// `0` keeps every result for the lifetime of the process, so memory grows
    /// with the number of distinct requests served.
    ///
    /// Environment variable: `RESULT_TTL_SECS`
    #[arg(long, env = "RESULT_TTL_SECS", default_value_t = 0)]
    pub result_ttl_secs: u64,

    /// Period of the background sweep that evicts expired results. Only used
    /// when `RESULT_TTL_SECS` is set.
    ///
    /// Environment variable: `SWEEP_INTERVAL_SECS`
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Timeout applied to every outbound call to Dapr and Web PubSub.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_SECS`
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Emit logs as JSON lines instead of human-readable output.
    ///
    /// Environment variable: `LOG_JSON`
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

/// Dapr pub/sub component and the two topics the relay uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    /// Outbound work topic.
    pub work_topic: String,
    /// Inbound completion topic.
    pub completion_topic: String,
}

/// Parsed Web PubSub connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct WebPubSubConnection {
    /// Service base URL with scheme and optional port, without trailing slash.
    pub endpoint: String,
    pub access_key: String,
}

impl WebPubSubConnection {
    /// Host (and port, if any) of the endpoint.
    pub fn host(&self) -> &str {
        let rest = self
            .endpoint
            .split_once("://")
            .map_or(self.endpoint.as_str(), |(_, rest)| rest);
        rest.split('/').next().unwrap_or(rest)
    }

    /// Endpoint with its scheme switched to the WebSocket equivalent.
    pub fn client_endpoint(&self) -> String {
        if let Some(rest) = self.endpoint.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.endpoint.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.endpoint.clone()
        }
    }
}

// Keeps the access key out of startup logs.
impl fmt::Debug for WebPubSubConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPubSubConnection")
            .field("endpoint", &self.endpoint)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

impl FromStr for WebPubSubConnection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut endpoint = None;
        let mut access_key = None;
        let mut port = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .with_context(|| format!("malformed connection string segment `{part}`"))?;
            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim().trim_end_matches('/').to_string()),
                "accesskey" => access_key = Some(value.trim().to_string()),
                "port" => {
                    port = Some(
                        value
                            .trim()
                            .parse::<u16>()
                            .with_context(|| format!("invalid port `{value}`"))?,
                    );
                }
                _ => {}
            }
        }

        let Some(mut endpoint) = endpoint.filter(|e| !e.is_empty()) else {
            bail!("connection string is missing `Endpoint`");
        };
        let Some(access_key) = access_key.filter(|k| !k.is_empty()) else {
            bail!("connection string is missing `AccessKey`");
        };
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            bail!("`Endpoint` must be an http(s) URL, got `{endpoint}`");
        }
        if let Some(port) = port {
            endpoint = format!("{endpoint}:{port}");
        }

        Ok(Self {
            endpoint,
            access_key,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub hub: String,
    pub webpubsub: WebPubSubConnection,
    pub queue: QueueConfig,
    pub dapr_base_url: String,
    /// `None` keeps results forever.
    pub result_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    pub request_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let Some(wps_qs) = args.wps_qs.filter(|qs| !qs.trim().is_empty()) else {
            bail!("Web PubSub connection string (WPS_QS) is not defined");
        };
        let webpubsub = wps_qs
            .parse::<WebPubSubConnection>()
            .context("invalid Web PubSub connection string (WPS_QS)")?;

        if args.hub_name.trim().is_empty() {
            bail!("HUB_NAME must not be empty");
        }

        for (name, value) in [
            ("QUEUE_NAME", &args.queue_name),
            ("QUEUE_TOPIC_TO_GENERATE", &args.queue_topic_to_generate),
            ("QUEUE_TOPIC_GENERATED", &args.queue_topic_generated),
        ] {
            if value.trim().is_empty() {
                bail!("{name} must not be empty");
            }
        }

        if args.request_timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be greater than 0");
        }

        let result_ttl =
            (args.result_ttl_secs > 0).then(|| Duration::from_secs(args.result_ttl_secs));
        if result_ttl.is_some() && args.sweep_interval_secs == 0 {
            bail!("SWEEP_INTERVAL_SECS must be greater than 0 when RESULT_TTL_SECS is set");
        }

        Ok(Self {
            server_addr: format!("{}:{}", args.host, args.port),
            hub: args.hub_name,
            webpubsub,
            queue: QueueConfig {
                name: args.queue_name,
                work_topic: args.queue_topic_to_generate,
                completion_topic: args.queue_topic_generated,
            },
            dapr_base_url: format!("http://{}:{}", args.dapr_host, args.dapr_http_port),
            result_ttl,
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        })
    }
}
