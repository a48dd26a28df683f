//! Periodic route refresh
//!
//! Background task that refetches the rule set on a fixed interval until the
//! shutdown token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::RouteCache;

/// Default refresh interval (10 minutes)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

/// Spawn the periodic refresh task
///
/// The first tick fires one `period` after spawning; the initial population is
/// done synchronously by [`crate::Forwarder::new`].
pub fn spawn_refresh_worker(
    cache: Arc<RouteCache>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = period.as_secs(), "Route refresh worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Route refresh worker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    debug!("Periodic route refresh");
                    cache.refresh().await;
                }
            }
        }
    })
}
