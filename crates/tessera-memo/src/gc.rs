use std::sync::Arc;
use std::time::Duration;

use tessera_cachedb::{CallCacheStore, GcReport};
use tessera_types::{unix_now, OpContext};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MemoResult;

const MIN_GC_INTERVAL: Duration = Duration::from_secs(1);

/// Run one expiry sweep against `store` at the current time.
pub fn run_gc_once(store: &dyn CallCacheStore, cx: &OpContext) -> MemoResult<GcReport> {
    let report = store.gc_expired(cx, unix_now())?;
    if report.deleted > 0 {
        info!(deleted = report.deleted, batches = report.batches, "expired call cache entries");
    } else {
        debug!("no expired call cache entries");
    }
    Ok(report)
}

/// Sweep expired entries every `every` until `shutdown` fires.
///
/// Intervals shorter than a second are rounded up to one second. Sweeps run
/// on the blocking pool. A failed sweep is logged and the loop
/// carries on; cancelling `shutdown` also interrupts a sweep in progress.
pub fn spawn_gc_loop(
    store: Arc<dyn CallCacheStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every.max(MIN_GC_INTERVAL));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately; sweep one interval after start.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }
            let store = Arc::clone(&store);
            let cx = OpContext::background().with_cancellation(shutdown.clone());
            match tokio::task::spawn_blocking(move || run_gc_once(store.as_ref(), &cx)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "call cache sweep failed"),
                Err(err) => warn!(error = %err, "call cache sweep task panicked"),
            }
        }
        debug!("call cache sweeper stopped");
    })
}
