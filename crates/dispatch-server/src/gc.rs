use std::sync::Arc;
use std::time::Duration;

use dispatch_store::Store;
use health::HealthHandle;

/// Runs the store's size-bounded GC on a fixed interval. Deliberately not
/// serialized with the dispatcher: the store is internally synchronised, so
/// a GC pass can run concurrently with Submit/Fetch/Push.
pub async fn gc_loop(store: Arc<Store>, interval: Duration, liveness: HealthHandle) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;
        liveness.report_healthy().await;

        match store.gc() {
            Ok((0, -1)) => tracing::debug!("gc skipped: store under size limit"),
            Ok((purged, remaining)) => {
                tracing::info!(purged, remaining, "gc pass complete");
                metrics::counter!("dispatch_gc_purged_total").increment(purged as u64);
            }
            Err(err) => tracing::error!(error = %err, "gc pass failed"),
        }
    }
}
