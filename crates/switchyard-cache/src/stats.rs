use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ResponseCache;

/// Log cache statistics every `interval` until `shutdown` fires
pub fn spawn_stats_logger(
    cache: Arc<ResponseCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = cache.stats();
                    tracing::info!(
                        hits = stats.hits,
                        misses = stats.misses,
                        evictions = stats.evictions,
                        size = stats.size,
                        capacity = stats.capacity,
                        hit_rate = format!("{:.2}%", stats.hit_rate()),
                        "response cache statistics"
                    );
                }
            }
        }

        tracing::debug!("cache statistics logger stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stops_on_shutdown() {
        let cache = Arc::new(ResponseCache::new(4, Duration::from_secs(60)));
        let shutdown = CancellationToken::new();
        let handle = spawn_stats_logger(Arc::clone(&cache), Duration::from_secs(1), shutdown.clone());

        tokio::time::advance(Duration::from_secs(3)).await;
        shutdown.cancel();

        handle.await.unwrap();
    }
}
