// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Opaque channel identifier as assigned by the remote chat service.
pub type ChannelId = i64;

/// One message as fetched from a channel. Identity is `(channel, id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMessage {
    pub id: i64,   // monotonic per channel
    pub date: i64, // unix seconds
    #[serde(default, alias = "message", alias = "text")]
    pub body: Option<String>, // None for media-only posts
    #[serde(default, alias = "reply_to_msg_id")]
    pub reply_to_id: Option<i64>,
}

impl RawMessage {
    pub fn new(id: i64, date: i64, body: Option<&str>) -> Self {
        Self {
            id,
            date,
            body: body.map(str::to_string),
            reply_to_id: None,
        }
    }

    pub fn replying_to(mut self, id: i64) -> Self {
        self.reply_to_id = Some(id);
        self
    }
}

/// One page request. Bounds are exclusive: `min_id < id < max_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageQuery {
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
    pub limit: usize,
}

/// Remote channel API. A page holds at most `limit` messages, newest first.
#[async_trait::async_trait]
pub trait ChannelSource: Send + Sync {
    async fn fetch_page(&self, channel: ChannelId, query: PageQuery) -> Result<Vec<RawMessage>>;
    fn name(&self) -> &'static str;
}
