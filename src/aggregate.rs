// src/aggregate.rs
//! Multi-channel windows and hourly bucket statistics.

use chrono::{DateTime, FixedOffset, Timelike};
use futures_util::future::join_all;
use metrics::counter;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::classify::classify_buckets;
use crate::compiler::CompiledRuleset;
use crate::ingest::cache::MessageCache;
use crate::ingest::types::{ChannelId, RawMessage};

/// Cache queries use minute-aligned lower bounds so nearby requests share work.
pub fn round_down_to_minute(ts: i64) -> i64 {
    ts - ts.rem_euclid(60)
}

/// Messages from every channel with `date >= from`, ascending by date.
pub async fn get_window(cache: &MessageCache, channel_ids: &[ChannelId], from: i64) -> Vec<RawMessage> {
    counter!("window_requests_total").increment(1);
    let rounded = round_down_to_minute(from);
    let per_channel = join_all(
        channel_ids
            .iter()
            .map(|&id| cache.messages_since(id, rounded)),
    )
    .await;

    let mut all: Vec<RawMessage> = per_channel
        .iter()
        .flat_map(|msgs| msgs.iter().filter(|m| m.date >= from).cloned())
        .collect();
    all.sort_by_key(|m| m.date);
    all
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsResult {
    /// 24 entries, local hour of day under the configured offset.
    pub hourly: Vec<BTreeMap<String, u64>>,
    pub daily: BTreeMap<String, u64>,
}

impl StatsResult {
    pub fn zeroed<'a>(buckets: impl IntoIterator<Item = &'a str>) -> Self {
        let daily: BTreeMap<String, u64> = buckets.into_iter().map(|b| (b.to_string(), 0)).collect();
        Self {
            hourly: vec![daily.clone(); 24],
            daily,
        }
    }
}

pub fn hour_of_day(date: i64, offset: FixedOffset) -> usize {
    DateTime::from_timestamp(date, 0)
        .map(|dt| dt.with_timezone(&offset).hour() as usize)
        .unwrap_or(0)
}

/// Count each message once per bucket it falls into. Bodiless messages are skipped.
pub fn compute_stats(messages: &[RawMessage], ruleset: &CompiledRuleset, offset: FixedOffset) -> StatsResult {
    let mut stats = StatsResult::zeroed(ruleset.bucket_names());
    for m in messages {
        let Some(body) = m.body.as_deref() else {
            continue;
        };
        let hit = classify_buckets(body, ruleset);
        if hit.is_empty() {
            continue;
        }
        let hour = hour_of_day(m.date, offset);
        for name in hit {
            *stats.hourly[hour].entry(name.to_string()).or_default() += 1;
            *stats.daily.entry(name.to_string()).or_default() += 1;
        }
    }
    stats
}
