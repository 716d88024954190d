// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cache_hits_total", "Channel reads served without fetching.");
        describe_counter!("cache_misses_total", "Channel reads that triggered a fetch.");
        describe_counter!(
            "cache_fetch_errors_total",
            "Fetches that failed or timed out; cached messages were served."
        );
        describe_counter!("cache_purged_total", "Messages dropped by retention purge.");
        describe_gauge!("cache_messages", "Cached messages per channel.");
        describe_gauge!(
            "cache_stale_after_secs",
            "Seconds after which a channel's newer messages are re-fetched."
        );
        describe_counter!("source_pages_total", "Page requests sent to the channel source.");
        describe_counter!(
            "source_page_bound_hits_total",
            "Paging walks cut short by the page bound."
        );
        describe_counter!("source_errors_total", "Channel source transport errors.");
        describe_histogram!("source_fetch_ms", "Page fetch latency in milliseconds.");
        describe_counter!("ruleset_compiles_total", "Keyword ruleset compilations.");
        describe_counter!(
            "ruleset_rejected_rules_total",
            "Keyword rules skipped because their pattern did not compile."
        );
        describe_counter!("ruleset_source_errors_total", "Rule source read failures.");
        describe_gauge!("ruleset_rules", "Rules in the current compiled ruleset.");
        describe_counter!("window_requests_total", "Aggregated window reads.");
        describe_counter!(
            "window_coalesced_total",
            "Window reads answered by an in-flight or recent identical read."
        );
        describe_counter!("purge_runs_total", "Retention purge runs.");
        describe_gauge!("purge_last_run_ts", "Unix ts of the last purge run.");
        describe_histogram!("request_processing_ms", "Message endpoint processing time in milliseconds.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe every series.
    pub fn init(stale_after_secs: i64) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_all();

        gauge!("cache_stale_after_secs").set(stale_after_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
