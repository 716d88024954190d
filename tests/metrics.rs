// tests/metrics.rs
use axum::body::{self, Body};
use http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

use channel_monitor::ingest::cache::MessageCache;
use channel_monitor::ingest::providers::MemoryChannelSource;
use channel_monitor::ingest::types::RawMessage;
use channel_monitor::metrics::Metrics;

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let metrics = Metrics::init(60).expect("recorder installs once per test binary");

    let src = Arc::new(MemoryChannelSource::new());
    src.push(1, RawMessage::new(1, chrono::Utc::now().timestamp(), Some("ок")));
    let cache = MessageCache::new(src);
    cache.messages_since(1, chrono::Utc::now().timestamp() - 3600).await;
    cache.messages_since(1, chrono::Utc::now().timestamp() - 3600).await;
    cache.purge_expired();

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "cache_hits_total",
        "cache_misses_total",
        "cache_messages",
        "source_pages_total",
        "source_fetch_ms",
        "cache_stale_after_secs",
        "# HELP cache_stale_after_secs",
        "# HELP cache_hits_total",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
}
