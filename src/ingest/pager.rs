// src/ingest/pager.rs
//! Paging over a [`ChannelSource`]: newer-than-id polling and backward walks down
//! to a date bound. Results come back ascending by id, flagged when the page bound
//! cut the walk short.

use anyhow::{anyhow, Result};
use metrics::{counter, histogram};
use std::time::{Duration, Instant};

use crate::ingest::types::{ChannelId, ChannelSource, PageQuery, RawMessage};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_MAX_PAGES: usize = 200;

/// What to fetch. `min_id` selects the newer-than path; otherwise the pager walks
/// backward from `max_id` (or from the newest message) until `min_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchOptions {
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
    pub min_date: Option<i64>,
}

impl FetchOptions {
    pub fn newer_than(id: i64) -> Self {
        Self {
            min_id: Some(id),
            ..Self::default()
        }
    }

    pub fn since(min_date: i64) -> Self {
        Self {
            min_date: Some(min_date),
            ..Self::default()
        }
    }

    pub fn older_than(id: i64, min_date: i64) -> Self {
        Self {
            max_id: Some(id),
            min_date: Some(min_date),
            ..Self::default()
        }
    }
}

/// One paging walk. When `truncated` is set the batch holds the newest pages
/// only, so it is complete just above its oldest date.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub messages: Vec<RawMessage>,
    pub truncated: bool,
}

impl Fetched {
    /// Earliest date this batch is known complete from. `requested` is the bound
    /// the walk was asked for; a cut walk can only vouch for dates above its
    /// oldest message, since that date may have more messages below the cut.
    pub fn complete_from(&self, requested: i64) -> Option<i64> {
        if !self.truncated {
            return Some(requested);
        }
        self.messages.iter().map(|m| m.date).min().map(|d| d + 1)
    }
}

pub struct Pager<'a> {
    source: &'a dyn ChannelSource,
    page_size: usize,
    max_pages: usize,
    timeout: Duration,
}

impl<'a> Pager<'a> {
    pub fn new(source: &'a dyn ChannelSource, page_size: usize, max_pages: usize, timeout: Duration) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
            timeout,
        }
    }

    async fn page(&self, channel: ChannelId, query: PageQuery) -> Result<Vec<RawMessage>> {
        let t0 = Instant::now();
        let res = tokio::time::timeout(self.timeout, self.source.fetch_page(channel, query)).await;
        histogram!("source_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("source_pages_total").increment(1);
        match res {
            Ok(r) => r,
            Err(_) => Err(anyhow!(
                "{} page fetch for channel {} timed out after {:?}",
                self.source.name(),
                channel,
                self.timeout
            )),
        }
    }

    /// Ascending messages matching `opts`.
    pub async fn fetch_messages(&self, channel: ChannelId, opts: FetchOptions) -> Result<Fetched> {
        let (mut messages, truncated) = match opts.min_id {
            Some(min_id) => self.walk_newer(channel, min_id).await?,
            None => self.walk_back(channel, opts.max_id, opts.min_date).await?,
        };
        if truncated {
            counter!("source_page_bound_hits_total").increment(1);
        }
        messages.reverse();
        Ok(Fetched { messages, truncated })
    }

    /// Everything above `min_id`. A full page means more may be waiting, so keep
    /// paging below the oldest id seen until a short page arrives.
    async fn walk_newer(&self, channel: ChannelId, min_id: i64) -> Result<(Vec<RawMessage>, bool)> {
        let mut buf = Vec::new();
        let mut max_id = None;
        for _ in 0..self.max_pages {
            let page = self
                .page(
                    channel,
                    PageQuery {
                        min_id: Some(min_id),
                        max_id,
                        limit: self.page_size,
                    },
                )
                .await?;
            let full = page.len() >= self.page_size;
            max_id = page.last().map(|m| m.id);
            buf.extend(page);
            if !full || max_id.is_none() {
                return Ok((buf, false));
            }
        }
        tracing::warn!(
            target: "cache",
            channel,
            pages = self.max_pages,
            "newer-message paging hit the page bound; older part of the burst left to backfill"
        );
        Ok((buf, true))
    }

    /// Walk backward until a message older than `min_date` shows up (the overshoot
    /// is discarded) or the channel runs out.
    async fn walk_back(
        &self,
        channel: ChannelId,
        mut max_id: Option<i64>,
        min_date: Option<i64>,
    ) -> Result<(Vec<RawMessage>, bool)> {
        let mut buf = Vec::new();
        for _ in 0..self.max_pages {
            let page = self
                .page(
                    channel,
                    PageQuery {
                        min_id: None,
                        max_id,
                        limit: self.page_size,
                    },
                )
                .await?;
            let Some(last) = page.last().map(|m| m.id) else {
                return Ok((buf, false));
            };
            for m in page {
                if min_date.is_some_and(|d| m.date < d) {
                    return Ok((buf, false));
                }
                buf.push(m);
            }
            max_id = Some(last);
        }
        tracing::warn!(target: "cache", channel, pages = self.max_pages, "backfill hit the page bound");
        Ok((buf, true))
    }
}
