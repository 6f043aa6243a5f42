use core::time::Duration;
use genrelay::CorrelationStore;
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Periodically evicts expired results from `store` until `shutdown_token`
/// is cancelled.
///
/// Reads already hide expired entries; the sweep only bounds memory for
/// results nobody ever looks up.
pub async fn sweep_loop(
    store: Arc<dyn CorrelationStore>,
    period: Duration,
    shutdown_token: CancellationToken,
) {
    tracing::debug!(?period, "result sweeper started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = store.evict_expired();
                if evicted > 0 {
                    tracing::info!(evicted, remaining = store.len(), "evicted expired results");
                }
            }
        }
    }

    tracing::debug!("result sweeper stopped");
}
