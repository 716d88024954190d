// src/ingest/providers/memory.rs
//! In-process channel store. Backs tests and local runs without a remote API.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::ingest::types::{ChannelId, ChannelSource, PageQuery, RawMessage};

#[derive(Default)]
pub struct MemoryChannelSource {
    channels: RwLock<HashMap<ChannelId, Vec<RawMessage>>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    delay: RwLock<Option<Duration>>,
}

impl MemoryChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id; the channel stays sorted ascending.
    pub fn push(&self, channel: ChannelId, msg: RawMessage) {
        let mut guard = self.channels.write().unwrap_or_else(|p| p.into_inner());
        let list = guard.entry(channel).or_default();
        match list.binary_search_by_key(&msg.id, |m| m.id) {
            Ok(i) => list[i] = msg,
            Err(i) => list.insert(i, msg),
        }
    }

    pub fn extend(&self, channel: ChannelId, msgs: impl IntoIterator<Item = RawMessage>) {
        for m in msgs {
            self.push(channel, m);
        }
    }

    /// While set, every fetch errors.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long before answering each page.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    /// Pages requested so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelSource for MemoryChannelSource {
    async fn fetch_page(&self, channel: ChannelId, query: PageQuery) -> Result<Vec<RawMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read().unwrap_or_else(|p| p.into_inner());
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory source: channel {channel} unavailable");
        }

        let guard = self.channels.read().unwrap_or_else(|p| p.into_inner());
        let Some(list) = guard.get(&channel) else {
            return Ok(Vec::new());
        };
        Ok(list
            .iter()
            .rev()
            .filter(|m| query.max_id.map_or(true, |max| m.id < max))
            .filter(|m| query.min_id.map_or(true, |min| m.id > min))
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
