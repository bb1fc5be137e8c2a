use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::SessionStore;

/// Periodically evicts sessions idle for longer than `ttl`. Runs until the
/// returned handle is aborted.
pub fn spawn_eviction(
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    every: Duration,
) -> JoinHandle<()> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.evict_idle_older_than(ttl).await {
                Ok(evicted) if evicted.is_empty() => {
                    debug!(event_name = "sessions.eviction_idle", "no idle sessions to evict");
                }
                Ok(evicted) => {
                    info!(
                        event_name = "sessions.evicted",
                        count = evicted.len(),
                        ttl_secs = ttl.num_seconds(),
                        "evicted idle sessions"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "sessions.eviction_failed",
                        error = %error,
                        "session eviction pass failed"
                    );
                }
            }
        }
    })
}
