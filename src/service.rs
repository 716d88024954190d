// src/service.rs
//! Request-facing facade: windows over the configured channels, filtering,
//! statistics and highlighting.

use chrono::{FixedOffset, Offset, Utc};
use metrics::histogram;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::aggregate::{compute_stats, get_window, round_down_to_minute, StatsResult};
use crate::classify::filter_messages;
use crate::clock::{SharedClock, SystemClock};
use crate::coalesce::{Coalescer, DEFAULT_COALESCE_TTL_MS};
use crate::compiler::RulesetCache;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::highlight::HighlightSpan;
use crate::ingest::cache::MessageCache;
use crate::ingest::providers::{HttpChannelSource, MemoryChannelSource};
use crate::ingest::types::{ChannelId, ChannelSource, RawMessage};
use crate::rules::{source::default_source, RulesetSource, StatBucket};

pub const STATS_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct FilteredMeta {
    pub total_found: usize,
    pub filtered_count: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilteredMessages {
    pub messages: Vec<RawMessage>,
    pub meta: FilteredMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyRef {
    pub id: i64,
    pub message: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub message: Option<String>,
    pub date: i64,
    /// Only set when the replied-to message is inside the same window.
    pub reply_to: Option<ReplyRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllMeta {
    pub total_found: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllMessages {
    pub messages: Vec<MessageView>,
    pub meta: AllMeta,
}

type WindowKey = (Vec<ChannelId>, i64);

pub struct MonitorService {
    cache: Arc<MessageCache>,
    rules: Arc<RulesetCache>,
    channels: Vec<ChannelId>,
    windows: Coalescer<WindowKey, Arc<Vec<RawMessage>>>,
    stats_offset: FixedOffset,
}

impl MonitorService {
    pub fn new(cache: Arc<MessageCache>, rules: Arc<RulesetCache>, channels: Vec<ChannelId>) -> Self {
        Self {
            cache,
            rules,
            channels,
            windows: Coalescer::new(Duration::from_millis(DEFAULT_COALESCE_TTL_MS)),
            stats_offset: Utc.fix(),
        }
    }

    /// Wire everything from config: HTTP bridge when `source_url` is set (an
    /// empty in-memory source otherwise), keyword file or seed rules.
    pub fn from_config(cfg: &MonitorConfig) -> MonitorResult<Self> {
        let source: Arc<dyn ChannelSource> = match cfg.source_url.as_deref() {
            Some(url) => Arc::new(
                HttpChannelSource::new(url, Duration::from_secs(cfg.fetch_timeout_secs))
                    .map_err(|e| MonitorError::Config(format!("{e:#}")))?,
            ),
            None => {
                tracing::warn!(target: "cache", "no source_url configured; using an empty in-memory source");
                Arc::new(MemoryChannelSource::new())
            }
        };
        let rules_source =
            default_source(cfg.rules_path.as_deref()).map_err(|e| MonitorError::RuleSource(format!("{e:#}")))?;
        Ok(Self::from_parts(cfg, source, Arc::from(rules_source), Arc::new(SystemClock)))
    }

    /// Same as `from_config` with the sources and clock supplied by the caller.
    pub fn from_parts(
        cfg: &MonitorConfig,
        source: Arc<dyn ChannelSource>,
        rules_source: Arc<dyn RulesetSource>,
        clock: SharedClock,
    ) -> Self {
        let cache = Arc::new(MessageCache::with_settings(source, cfg.cache_settings(), clock.clone()));
        let rules = Arc::new(RulesetCache::with_ttl(rules_source, cfg.ruleset_ttl(), clock));
        Self::new(cache, rules, cfg.channels.clone())
            .with_stats_offset(cfg.stats_offset())
            .with_coalesce_ttl(cfg.coalesce_ttl())
    }

    pub fn with_stats_offset(mut self, offset: FixedOffset) -> Self {
        self.stats_offset = offset;
        self
    }

    pub fn with_coalesce_ttl(mut self, ttl: Duration) -> Self {
        self.windows = Coalescer::new(ttl);
        self
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    pub fn rules(&self) -> &Arc<RulesetCache> {
        &self.rules
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    fn window_start(&self, hours: i64) -> MonitorResult<i64> {
        if hours < 1 {
            return Err(MonitorError::InvalidPeriod { hours });
        }
        Ok(self.cache.clock().now_unix() - hours * 3600)
    }

    /// Messages from all configured channels with `date >= from`, ascending.
    /// Identical concurrent reads (same minute-aligned start) share one fetch.
    pub async fn window(&self, from: i64) -> MonitorResult<Vec<RawMessage>> {
        if self.channels.is_empty() {
            return Err(MonitorError::NoChannels);
        }
        let rounded = round_down_to_minute(from);
        let key = (self.channels.clone(), rounded);
        let shared = self
            .windows
            .get_or_run(key, || async {
                Arc::new(get_window(&self.cache, &self.channels, rounded).await)
            })
            .await;
        Ok(shared.iter().filter(|m| m.date >= from).cloned().collect())
    }

    pub async fn get_filtered_messages(&self, hours: i64) -> MonitorResult<FilteredMessages> {
        let t0 = Instant::now();
        let from = self.window_start(hours)?;
        let all = self.window(from).await?;
        let total_found = all.len();
        let ruleset = self.rules.current();
        let messages = filter_messages(all, &ruleset);
        let processing_time_ms = elapsed_ms(t0);
        debug!(target: "filter", hours, total_found, kept = messages.len(), processing_time_ms, "filtered window");
        Ok(FilteredMessages {
            meta: FilteredMeta {
                total_found,
                filtered_count: messages.len(),
                processing_time_ms,
            },
            messages,
        })
    }

    /// Unfiltered window with reply references resolved inside the window.
    pub async fn get_all_messages(&self, hours: i64) -> MonitorResult<AllMessages> {
        let t0 = Instant::now();
        let from = self.window_start(hours)?;
        let all = self.window(from).await?;
        let messages = resolve_replies(&all);
        Ok(AllMessages {
            meta: AllMeta {
                total_found: all.len(),
                processing_time_ms: elapsed_ms(t0),
            },
            messages,
        })
    }

    /// Bucket counts over the trailing 24 hours.
    pub async fn get_stats(&self) -> MonitorResult<StatsResult> {
        let ruleset = self.rules.current();
        if ruleset.buckets.is_empty() {
            return Ok(StatsResult::zeroed(std::iter::empty::<&str>()));
        }
        let from = self.window_start(STATS_WINDOW_HOURS)?;
        let msgs = self.window(from).await?;
        Ok(compute_stats(&msgs, &ruleset, self.stats_offset))
    }

    pub fn highlight_message(&self, text: &str) -> Vec<HighlightSpan> {
        let ruleset = self.rules.current();
        ruleset.highlighter.spans(text).map(HighlightSpan::from).collect()
    }

    pub fn stat_buckets(&self) -> Vec<StatBucket> {
        self.rules.stat_buckets()
    }

    /// Drop the compiled ruleset so the next read picks up edited rules.
    pub fn invalidate_rules(&self) {
        self.rules.invalidate();
    }
}

fn elapsed_ms(t0: Instant) -> u64 {
    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("request_processing_ms").record(ms);
    ms as u64
}

/// Ids are only unique per channel; on a clash the earliest message in the window wins.
pub fn resolve_replies(window: &[RawMessage]) -> Vec<MessageView> {
    let mut by_id: HashMap<i64, &RawMessage> = HashMap::with_capacity(window.len());
    for m in window {
        by_id.entry(m.id).or_insert(m);
    }
    window
        .iter()
        .map(|m| MessageView {
            id: m.id,
            message: m.body.clone(),
            date: m.date,
            reply_to: m
                .reply_to_id
                .and_then(|rid| by_id.get(&rid))
                .map(|r| ReplyRef {
                    id: r.id,
                    message: r.body.clone(),
                    date: r.date,
                }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_resolve_only_inside_window() {
        let w = vec![
            RawMessage::new(10, 100, Some("вопрос")),
            RawMessage::new(11, 110, Some("ответ")).replying_to(10),
            RawMessage::new(12, 120, Some("эхо")).replying_to(3),
        ];
        let v = resolve_replies(&w);
        assert_eq!(v[0].reply_to, None);
        assert_eq!(
            v[1].reply_to,
            Some(ReplyRef {
                id: 10,
                message: Some("вопрос".into()),
                date: 100
            })
        );
        assert_eq!(v[2].reply_to, None);
    }

    #[test]
    fn duplicate_ids_resolve_to_the_first_in_window() {
        let w = vec![
            RawMessage::new(5, 100, Some("канал А")),
            RawMessage::new(5, 150, Some("канал Б")),
            RawMessage::new(6, 200, Some("ответ")).replying_to(5),
        ];
        let v = resolve_replies(&w);
        assert_eq!(v[2].reply_to.as_ref().and_then(|r| r.message.as_deref()), Some("канал А"));
        assert_eq!(v.len(), 3);
    }
}
