//! Periodic maintenance sweeps
//!
//! A single timer-driven task deactivates expired hot deals and deletes
//! abandoned carts. Both passes are idempotent and only touch rows that are
//! already stale by timestamp predicate, so they are safe to run alongside
//! live traffic. Rows are processed independently; one bad row never aborts
//! the batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::store::Store;

#[derive(Clone, Copy, Debug)]
pub struct SweepConfig {
    pub interval: Duration,
    /// Inactive, unsaved carts untouched for this long are deleted.
    pub abandoned_cart_age: chrono::Duration,
}

/// One sweep pass. Separated from the timer loop so tests can drive it.
pub fn run_sweep(store: &Store, config: &SweepConfig) {
    let now = Utc::now();
    let expired_deals = store.deactivate_expired_deals(now);
    let purged_carts = store.purge_abandoned_carts(now - config.abandoned_cart_age);
    if expired_deals > 0 || purged_carts > 0 {
        tracing::info!(expired_deals, purged_carts, "sweep pass complete");
    }
}

pub fn spawn_sweeper(store: Arc<Store>, config: SweepConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            run_sweep(&store, &config);
        }
    })
}
