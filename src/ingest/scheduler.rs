// src/ingest/scheduler.rs
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ingest::cache::MessageCache;

pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60 * 60;

/// Spawn the retention purge. Runs once immediately, then every `every`.
pub fn spawn_purge_scheduler(cache: Arc<MessageCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            counter!("purge_runs_total").increment(1);
            gauge!("purge_last_run_ts").set(cache.clock().now_unix() as f64);
            tracing::info!(target: "cache", removed, "purge tick");
        }
    })
}
