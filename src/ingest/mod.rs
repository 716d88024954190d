// src/ingest/mod.rs
//! Channel ingestion: the remote source seam, paging, the per-channel cache and
//! its retention purge.

pub mod cache;
pub mod pager;
pub mod providers;
pub mod scheduler;
pub mod types;

pub use cache::{CacheSettings, ChannelCache, MessageCache, RefreshKind};
pub use pager::{FetchOptions, Fetched, Pager};
pub use types::{ChannelId, ChannelSource, PageQuery, RawMessage};
