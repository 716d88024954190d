//! Channel monitor: binary entrypoint
//! Boots the Axum HTTP server, wiring the message cache, ruleset, purge task,
//! routes and `/metrics`.

use channel_monitor::{
    ingest::scheduler::spawn_purge_scheduler, metrics::Metrics, router, AppState, MonitorConfig,
    MonitorService,
};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - MONITOR_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("MONITOR_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_env("MONITOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("cache=debug,rules=info,filter=info,warn"));

    // Shuttle may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let cfg = MonitorConfig::load_default()?;
    tracing::info!(
        channels = cfg.channels.len(),
        source = cfg.source_url.as_deref().unwrap_or("memory"),
        "monitor config loaded"
    );

    let metrics = Metrics::init(cfg.stale_after_secs)?;
    let service = MonitorService::from_config(&cfg).map_err(anyhow::Error::from)?;
    let state = AppState::new(service);

    let _purge_task = spawn_purge_scheduler(state.service.cache().clone(), cfg.purge_interval());

    let router = router(state).merge(metrics.router());

    Ok(router.into())
}
