// tests/service_window.rs
//
// MonitorService end to end over an in-memory source: filtering, stats,
// reply resolution, contract errors and window coalescing.

use std::sync::Arc;

use channel_monitor::clock::ManualClock;
use channel_monitor::ingest::providers::MemoryChannelSource;
use channel_monitor::ingest::types::RawMessage;
use channel_monitor::rules::{KeywordRule, Polarity, StaticRulesetSource, StatBucket};
use channel_monitor::{MonitorConfig, MonitorError, MonitorService};

// 2023-11-14 22:13:20 UTC
const NOW: i64 = 1_700_000_000;

fn rules() -> Vec<KeywordRule> {
    vec![
        KeywordRule::literal(1, "✅", Polarity::Positive).in_bucket("alert"),
        KeywordRule::literal(2, "ок", Polarity::Positive).in_bucket("alert"),
        KeywordRule::literal(3, "синие", Polarity::Positive).in_bucket("blue"),
        KeywordRule::literal(4, "бля", Polarity::Negative),
        KeywordRule::literal(5, "?", Polarity::Negative),
        KeywordRule::regex(6, r"воины[\s]+добра", Polarity::Positive).in_bucket("alert"),
    ]
}

fn buckets() -> Vec<StatBucket> {
    ["alert", "blue"]
        .iter()
        .enumerate()
        .map(|(i, n)| StatBucket {
            id: i as i64 + 1,
            name: n.to_string(),
            color: "#000000".into(),
        })
        .collect()
}

fn service_with(cfg: MonitorConfig) -> (Arc<MemoryChannelSource>, MonitorService) {
    let src = Arc::new(MemoryChannelSource::new());
    let rules = Arc::new(StaticRulesetSource::new(rules(), buckets()));
    let clock = Arc::new(ManualClock::at_unix(NOW));
    let svc = MonitorService::from_parts(&cfg, src.clone(), rules, clock);
    (src, svc)
}

fn two_channels() -> MonitorConfig {
    MonitorConfig {
        channels: vec![10, 20],
        coalesce_ttl_ms: 0,
        ..MonitorConfig::default()
    }
}

fn populate(src: &MemoryChannelSource) {
    src.extend(
        10,
        vec![
            RawMessage::new(1, NOW - 7200, Some("✅ давно")),
            RawMessage::new(2, NOW - 1800, Some("✅")),
            RawMessage::new(3, NOW - 1700, Some("✅ бля ")),
            RawMessage::new(4, NOW - 1600, None),
            RawMessage::new(5, NOW - 60, Some("синие ок")).replying_to(2),
        ],
    );
    src.extend(
        20,
        vec![
            RawMessage::new(1, NOW - 1200, Some("всё ок?")),
            RawMessage::new(2, NOW - 600, Some("воины  добра")),
            RawMessage::new(3, NOW - 30, Some("окно открыто")),
        ],
    );
}

#[tokio::test]
async fn filtered_messages_apply_polarity_and_report_meta() {
    let (src, svc) = service_with(two_channels());
    populate(&src);

    let out = svc.get_filtered_messages(1).await.unwrap();
    assert_eq!(out.meta.total_found, 7);
    let kept: Vec<_> = out.messages.iter().map(|m| m.body.clone().unwrap()).collect();
    assert_eq!(kept, vec!["✅", "воины  добра", "синие ок"]);
    assert_eq!(out.meta.filtered_count, 3);
    assert!(out.messages.windows(2).all(|w| w[0].date <= w[1].date));

    let wide = svc.get_filtered_messages(3).await.unwrap();
    assert_eq!(wide.meta.total_found, 8);
    assert_eq!(wide.messages.first().unwrap().body.as_deref(), Some("✅ давно"));
}

#[tokio::test]
async fn all_messages_resolve_replies_inside_window() {
    let (src, svc) = service_with(two_channels());
    populate(&src);

    let out = svc.get_all_messages(1).await.unwrap();
    assert_eq!(out.meta.total_found, 7);
    let reply = out.messages.iter().find(|m| m.message.as_deref() == Some("синие ок")).unwrap();
    let target = reply.reply_to.as_ref().unwrap();
    assert_eq!(target.message.as_deref(), Some("✅"));
    assert_eq!(target.date, NOW - 1800);
}

#[tokio::test]
async fn stats_count_buckets_per_message() {
    let (src, svc) = service_with(two_channels());
    populate(&src);

    let stats = svc.get_stats().await.unwrap();
    assert_eq!(stats.hourly.len(), 24);
    // ✅ давно, ✅, ✅ бля, синие ок, всё ок?, воины добра
    assert_eq!(stats.daily["alert"], 6);
    assert_eq!(stats.daily["blue"], 1);
    // NOW-60 is 22:12 UTC
    assert_eq!(stats.hourly[22]["blue"], 1);
    assert_eq!(stats.hourly[20]["alert"], 1);
}

#[tokio::test]
async fn stats_hour_honours_offset() {
    let cfg = MonitorConfig {
        stats_utc_offset_minutes: 180,
        ..two_channels()
    };
    let (src, svc) = service_with(cfg);
    populate(&src);
    let stats = svc.get_stats().await.unwrap();
    assert_eq!(stats.hourly[1]["blue"], 1);
}

#[tokio::test]
async fn contract_violations_are_errors() {
    let (_src, svc) = service_with(two_channels());
    assert!(matches!(
        svc.get_filtered_messages(0).await,
        Err(MonitorError::InvalidPeriod { hours: 0 })
    ));

    let (_src, empty) = service_with(MonitorConfig::default());
    assert!(matches!(empty.get_all_messages(1).await, Err(MonitorError::NoChannels)));
}

#[tokio::test]
async fn identical_reads_are_coalesced_within_ttl() {
    let cfg = MonitorConfig {
        coalesce_ttl_ms: 60_000,
        ..two_channels()
    };
    let (src, svc) = service_with(cfg);
    populate(&src);

    let (a, b) = tokio::join!(svc.get_all_messages(1), svc.get_all_messages(1));
    let calls = src.calls();
    assert_eq!(a.unwrap().meta.total_found, b.unwrap().meta.total_found);

    svc.get_filtered_messages(1).await.unwrap();
    assert_eq!(src.calls(), calls, "same minute-aligned window reuses the result");
}

#[tokio::test]
async fn highlight_uses_current_ruleset() {
    let (_src, svc) = service_with(two_channels());
    let spans = svc.highlight_message("всё ок?");
    let hits: Vec<_> = spans.iter().filter_map(|s| s.keyword.as_deref()).collect();
    assert_eq!(hits, vec!["ок", "?"]);
    assert_eq!(spans.iter().map(|s| s.text.as_str()).collect::<String>(), "всё ок?");
    assert_eq!(svc.stat_buckets().len(), 2);
}
