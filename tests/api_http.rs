// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::sync::Arc;

use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use channel_monitor::clock::ManualClock;
use channel_monitor::ingest::providers::MemoryChannelSource;
use channel_monitor::ingest::types::RawMessage;
use channel_monitor::rules::StaticRulesetSource;
use channel_monitor::{router, AppState, MonitorConfig, MonitorService};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests
const NOW: i64 = 1_700_000_000;

fn test_router(channels: Vec<i64>) -> Router {
    let src = Arc::new(MemoryChannelSource::new());
    src.extend(
        7,
        vec![
            RawMessage::new(1, NOW - 600, Some("тихо ✅")),
            RawMessage::new(2, NOW - 300, Some("а какой автобус?")),
            RawMessage::new(3, NOW - 100, Some("чисто")).replying_to(1),
        ],
    );
    let cfg = MonitorConfig {
        channels,
        coalesce_ttl_ms: 0,
        ..MonitorConfig::default()
    };
    let service = MonitorService::from_parts(
        &cfg,
        src,
        Arc::new(StaticRulesetSource::seeded()),
        Arc::new(ManualClock::at_unix(NOW)),
    );
    router(AppState::new(service))
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Json) {
    let resp = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Json::Null))
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let resp = test_router(vec![7])
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn messages_endpoint_filters_with_seed_rules() {
    let (status, v) = get_json(test_router(vec![7]), "/messages?hours=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["meta"]["total_found"], 3);
    assert_eq!(v["meta"]["filtered_count"], 2);
    let bodies: Vec<&str> = v["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["тихо ✅", "чисто"]);
}

#[tokio::test]
async fn hours_defaults_to_one_and_rejects_bad_values() {
    let (status, v) = get_json(test_router(vec![7]), "/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["meta"]["total_found"], 3);

    let (status, v) = get_json(test_router(vec![7]), "/messages?hours=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"], "invalid_period");

    let (status, _) = get_json(test_router(vec![7]), "/messages?hours=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn all_messages_carry_reply_refs() {
    let (status, v) = get_json(test_router(vec![7]), "/messages/all?hours=2").await;
    assert_eq!(status, StatusCode::OK);
    let msgs = v["messages"].as_array().unwrap();
    assert_eq!(msgs.len(), 3);
    assert_eq!(msgs[2]["reply_to"]["id"], 1);
    assert!(msgs[0]["reply_to"].is_null());
}

#[tokio::test]
async fn missing_channels_is_a_server_error() {
    let (status, v) = get_json(test_router(vec![]), "/messages/all").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(v["error"], "no_channels");
}

#[tokio::test]
async fn stats_and_buckets() {
    let (status, v) = get_json(test_router(vec![7]), "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["hourly"].as_array().unwrap().len(), 24);
    // Seed positives all live in "alert"; the question has no positive keyword.
    assert_eq!(v["daily"]["alert"], 2);

    let (status, v) = get_json(test_router(vec![7]), "/stats/buckets").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["blue", "green", "alert"]);
}

#[tokio::test]
async fn highlight_and_invalidate() {
    let app = test_router(vec![7]);
    let resp = app
        .clone()
        .oneshot(
            Request::post("/highlight")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"text":"всё ок?"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let spans: Json = serde_json::from_slice(&bytes).unwrap();
    let spans = spans.as_array().unwrap();
    assert_eq!(spans[1]["keyword"], "ок");
    assert_eq!(spans[1]["polarity"], "positive");
    assert_eq!(spans[2]["polarity"], "negative");

    let resp = app
        .oneshot(
            Request::post("/admin/rules/invalidate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
