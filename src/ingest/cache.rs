// src/ingest/cache.rs
//! Per-channel message cache.
//!
//! Each channel holds an ascending, id-deduplicated list plus two markers: when
//! newer messages were last pulled, and the earliest date the list is known to
//! cover. Reads never hold a lock across an await; fetch results are merged into
//! whatever the entry holds at merge time, so concurrent refreshes only add.
//!
//! A walk cut short by the page bound only vouches for dates above its oldest
//! message. A cut newer-fetch drops the cached tail below its batch so later
//! backfills page down through the hole.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::ingest::pager::{FetchOptions, Pager, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE};
use crate::ingest::types::{ChannelId, ChannelSource, RawMessage};

pub const DEFAULT_STALE_AFTER_SECS: i64 = 60;
pub const DEFAULT_RETENTION_SECS: i64 = 24 * 60 * 60;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Copy, Debug)]
pub struct CacheSettings {
    /// Newer messages are re-fetched once the last pull is at least this old.
    pub stale_after: ChronoDuration,
    /// Purge drops messages older than `now - retention`.
    pub retention: ChronoDuration,
    pub page_size: usize,
    pub max_pages: usize,
    /// Per page request.
    pub fetch_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_after: ChronoDuration::seconds(DEFAULT_STALE_AFTER_SECS),
            retention: ChronoDuration::seconds(DEFAULT_RETENTION_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelCache {
    messages: Arc<Vec<RawMessage>>,
    last_new_fetch_at: Option<DateTime<Utc>>,
    /// Earliest date the list is complete from. `None` until the first fetch.
    covered_from: Option<i64>,
}

impl ChannelCache {
    pub fn messages(&self) -> Arc<Vec<RawMessage>> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_new_fetch_at(&self) -> Option<DateTime<Utc>> {
        self.last_new_fetch_at
    }

    pub fn covered_from(&self) -> Option<i64> {
        self.covered_from
    }

    pub fn is_populated(&self) -> bool {
        self.covered_from.is_some()
    }

    pub fn newest_id(&self) -> Option<i64> {
        self.messages.iter().map(|m| m.id).max()
    }

    pub fn oldest_id(&self) -> Option<i64> {
        self.messages.iter().map(|m| m.id).min()
    }

    /// Union by id with the current list; incoming copies replace cached ones.
    /// The result is ascending by date, ties in id order. Re-merging is a no-op.
    pub fn merge(&mut self, older: Vec<RawMessage>, newer: Vec<RawMessage>) {
        if older.is_empty() && newer.is_empty() {
            return;
        }
        let mut by_id: BTreeMap<i64, RawMessage> =
            self.messages.iter().map(|m| (m.id, m.clone())).collect();
        for m in older.into_iter().chain(newer) {
            by_id.insert(m.id, m);
        }
        let mut merged: Vec<RawMessage> = by_id.into_values().collect();
        merged.sort_by_key(|m| m.date);
        self.messages = Arc::new(merged);
    }

    /// Drop messages dated before `cutoff`. Returns how many went.
    pub fn purge_older_than(&mut self, cutoff: i64) -> usize {
        if self.covered_from.is_some_and(|c| c < cutoff) {
            self.covered_from = Some(cutoff);
        }
        if self.messages.first().map_or(true, |m| m.date >= cutoff) {
            return 0;
        }
        let before = self.messages.len();
        let kept: Vec<RawMessage> = self
            .messages
            .iter()
            .filter(|m| m.date >= cutoff)
            .cloned()
            .collect();
        self.messages = Arc::new(kept);
        before - self.messages.len()
    }

    fn mark_newer_fetched(&mut self, at: DateTime<Utc>) {
        self.last_new_fetch_at = Some(at);
    }

    fn extend_coverage(&mut self, from: i64) {
        self.covered_from = Some(self.covered_from.map_or(from, |c| c.min(from)));
    }

    fn apply_coverage(&mut self, coverage: Coverage) {
        match coverage {
            Coverage::Unchanged => {}
            Coverage::Extend(from) => self.extend_coverage(from),
            Coverage::Reset(from) => self.covered_from = from,
        }
    }

    /// A newer-fetch cut by the page bound leaves a hole under `batch`. Everything
    /// older than the batch goes and coverage restarts at the batch, so backfill
    /// walks down through the hole from the batch's oldest id.
    fn restart_above_gap(&mut self, batch: Vec<RawMessage>, complete_from: Option<i64>) {
        if let Some(floor) = batch.iter().map(|m| m.id).min() {
            let kept: Vec<RawMessage> = self.messages.iter().filter(|m| m.id >= floor).cloned().collect();
            self.messages = Arc::new(kept);
        }
        self.merge(Vec::new(), batch);
        self.covered_from = complete_from;
    }
}

/// How a fetch moves the covered lower bound.
#[derive(Debug, Clone, Copy)]
enum Coverage {
    Unchanged,
    /// Contiguous with what is cached: lower the bound to this date.
    Extend(i64),
    /// Replace the bound outright.
    Reset(Option<i64>),
}

/// What a read had to do; handy for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    Hit,
    Initial,
    Newer,
    Backfill,
    NewerAndBackfill,
}

pub struct MessageCache {
    source: Arc<dyn ChannelSource>,
    channels: DashMap<ChannelId, ChannelCache>,
    settings: CacheSettings,
    clock: SharedClock,
}

impl MessageCache {
    pub fn new(source: Arc<dyn ChannelSource>) -> Self {
        Self::with_settings(source, CacheSettings::default(), Arc::new(SystemClock))
    }

    pub fn with_settings(source: Arc<dyn ChannelSource>, settings: CacheSettings, clock: SharedClock) -> Self {
        crate::metrics::describe_all();
        Self {
            source,
            channels: DashMap::new(),
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Copy of one channel's entry (the message list is shared, not copied).
    pub fn snapshot(&self, channel: ChannelId) -> Option<ChannelCache> {
        self.channels.get(&channel).map(|e| e.value().clone())
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|e| *e.key()).collect()
    }

    fn pager(&self) -> Pager<'_> {
        Pager::new(
            self.source.as_ref(),
            self.settings.page_size,
            self.settings.max_pages,
            self.settings.fetch_timeout,
        )
    }

    /// Cached list for `channel`, refreshed as needed so that it covers `from`
    /// and is no staler than `stale_after`. The list may hold messages older
    /// than `from`; callers apply their own exact bound.
    ///
    /// Fetch failures are logged and the cached list is returned as is.
    pub async fn messages_since(&self, channel: ChannelId, from: i64) -> Arc<Vec<RawMessage>> {
        self.refresh(channel, from).await.0
    }

    pub async fn refresh(&self, channel: ChannelId, from: i64) -> (Arc<Vec<RawMessage>>, RefreshKind) {
        let snap = self.snapshot(channel).unwrap_or_default();
        let now = self.clock.now();
        let stale = snap
            .last_new_fetch_at
            .map_or(true, |t| now.signed_duration_since(t) >= self.settings.stale_after);
        let needs_backfill = snap.covered_from.map_or(true, |c| from < c);

        if !stale && !needs_backfill {
            counter!("cache_hits_total").increment(1);
            return (snap.messages(), RefreshKind::Hit);
        }
        counter!("cache_misses_total").increment(1);

        let pager = self.pager();

        // Nothing cached: one walk from the top covers both directions.
        if snap.is_empty() {
            let bound = snap.covered_from.map_or(from, |c| c.min(from));
            return match pager.fetch_messages(channel, FetchOptions::since(bound)).await {
                Ok(fetched) => {
                    let covered = fetched.complete_from(bound);
                    debug!(
                        target: "cache",
                        channel,
                        fetched = fetched.messages.len(),
                        from = bound,
                        truncated = fetched.truncated,
                        "initial fetch"
                    );
                    let msgs =
                        self.apply(channel, Vec::new(), fetched.messages, Some(now), Coverage::Reset(covered));
                    (msgs, RefreshKind::Initial)
                }
                Err(e) => (self.fallback(channel, &snap, e), RefreshKind::Initial),
            };
        }

        let newer = async {
            match (stale, snap.newest_id()) {
                (true, Some(id)) => Some(pager.fetch_messages(channel, FetchOptions::newer_than(id)).await),
                _ => None,
            }
        };
        let older = async {
            match (needs_backfill, snap.oldest_id()) {
                (true, Some(id)) => Some(pager.fetch_messages(channel, FetchOptions::older_than(id, from)).await),
                _ => None,
            }
        };
        let (newer, older) = tokio::join!(newer, older);

        let kind = match (newer.is_some(), older.is_some()) {
            (true, true) => RefreshKind::NewerAndBackfill,
            (false, true) => RefreshKind::Backfill,
            _ => RefreshKind::Newer,
        };

        let mut failed = None;
        let mut newer_cut = None;
        let (newer_msgs, fetched_at) = match newer {
            Some(Ok(f)) => {
                if f.truncated {
                    newer_cut = Some(f.complete_from(from));
                }
                (f.messages, Some(now))
            }
            Some(Err(e)) => {
                failed = Some(e);
                (Vec::new(), None)
            }
            None => (Vec::new(), None),
        };
        let (older_msgs, coverage) = match older {
            Some(Ok(f)) => {
                let coverage = f.complete_from(from).map_or(Coverage::Unchanged, Coverage::Extend);
                (f.messages, coverage)
            }
            Some(Err(e)) => {
                failed = Some(e);
                (Vec::new(), Coverage::Unchanged)
            }
            None => (Vec::new(), Coverage::Unchanged),
        };

        debug!(
            target: "cache",
            channel,
            newer = newer_msgs.len(),
            older = older_msgs.len(),
            ?kind,
            "cache refresh"
        );
        let msgs = match newer_cut {
            // Older results sit below the hole; backfill fetches them again later.
            Some(complete_from) => {
                warn!(
                    target: "cache",
                    channel,
                    kept = newer_msgs.len(),
                    "newer burst exceeded the page bound; cache restarts above the gap"
                );
                self.restart(channel, newer_msgs, complete_from, now)
            }
            None => self.apply(channel, older_msgs, newer_msgs, fetched_at, coverage),
        };
        if let Some(e) = failed {
            warn!(target: "cache", channel, error = ?e, "partial refresh failed; serving cached messages");
            counter!("cache_fetch_errors_total").increment(1);
        }
        (msgs, kind)
    }

    /// Merge into the entry as it is now, not as it was when the fetch started.
    fn apply(
        &self,
        channel: ChannelId,
        older: Vec<RawMessage>,
        newer: Vec<RawMessage>,
        fetched_at: Option<DateTime<Utc>>,
        coverage: Coverage,
    ) -> Arc<Vec<RawMessage>> {
        let mut entry = self.channels.entry(channel).or_default();
        entry.merge(older, newer);
        if let Some(at) = fetched_at {
            entry.mark_newer_fetched(at);
        }
        entry.apply_coverage(coverage);
        gauge!("cache_messages", "channel" => channel.to_string()).set(entry.len() as f64);
        entry.messages()
    }

    fn restart(
        &self,
        channel: ChannelId,
        batch: Vec<RawMessage>,
        complete_from: Option<i64>,
        fetched_at: DateTime<Utc>,
    ) -> Arc<Vec<RawMessage>> {
        let mut entry = self.channels.entry(channel).or_default();
        entry.restart_above_gap(batch, complete_from);
        entry.mark_newer_fetched(fetched_at);
        gauge!("cache_messages", "channel" => channel.to_string()).set(entry.len() as f64);
        entry.messages()
    }

    fn fallback(&self, channel: ChannelId, snap: &ChannelCache, err: anyhow::Error) -> Arc<Vec<RawMessage>> {
        warn!(target: "cache", channel, error = ?err, "fetch failed; serving cached messages");
        counter!("cache_fetch_errors_total").increment(1);
        self.snapshot(channel)
            .map(|e| e.messages())
            .unwrap_or_else(|| snap.messages())
    }

    /// Insert messages directly, e.g. from a push feed. Coverage is untouched.
    pub fn merge(&self, channel: ChannelId, older: Vec<RawMessage>, newer: Vec<RawMessage>) {
        self.apply(channel, older, newer, None, Coverage::Unchanged);
    }

    /// Drop messages dated before `cutoff` in every channel. Returns the total removed.
    pub fn purge_older_than(&self, cutoff: i64) -> usize {
        let mut removed = 0;
        for mut entry in self.channels.iter_mut() {
            let n = entry.purge_older_than(cutoff);
            if n > 0 {
                gauge!("cache_messages", "channel" => entry.key().to_string()).set(entry.len() as f64);
            }
            removed += n;
        }
        counter!("cache_purged_total").increment(removed as u64);
        removed
    }

    /// Retention purge relative to the cache clock.
    pub fn purge_expired(&self) -> usize {
        let cutoff = self.clock.now_unix() - self.settings.retention.num_seconds();
        let removed = self.purge_older_than(cutoff);
        debug!(target: "cache", cutoff, removed, "retention purge");
        removed
    }
}
