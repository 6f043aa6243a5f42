#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use genrelay::{CorrelationStore, MemoryStore, TtlStore};
use server::broker::{dapr::DaprPublisher, http_client, webpubsub::WebPubSubClient};
use server::config::{CliArgs, ServerConfig};
use server::service::{handler::RelayService, router, sweeper::sweep_loop};
use server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let providers = init_telemetry(args.log_json)?;

    let config = match ServerConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e:#}. Aborting.");
            providers.shutdown();
            std::process::exit(1);
        }
    };

    let store: Arc<dyn CorrelationStore> = match config.result_ttl {
        Some(ttl) => Arc::new(TtlStore::new(ttl)),
        None => Arc::new(MemoryStore::new()),
    };

    let client = http_client(config.request_timeout)?;
    let publisher = Arc::new(DaprPublisher::new(client.clone(), &config.dapr_base_url));
    let webpubsub = WebPubSubClient::new(client, config.webpubsub.clone(), &config.hub);
    let service = RelayService::new(&config, Arc::clone(&store), publisher, webpubsub);

    let shutdown_token = CancellationToken::new();
    let sweeper = config.result_ttl.map(|_| {
        tokio::spawn(sweep_loop(
            Arc::clone(&store),
            config.sweep_interval,
            shutdown_token.clone(),
        ))
    });

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal(shutdown_token))
        .await?;

    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            tracing::error!("Result sweeper failed: {e}");
        }
    }

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting relay on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            addr = %config.server_addr,
            hub = %config.hub,
            work_topic = %config.queue.work_topic,
            completion_topic = %config.queue.completion_topic,
            "Starting relay"
        );
    }
}

async fn shutdown_signal(shutdown_token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    shutdown_token.cancel();
}
