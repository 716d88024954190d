// src/ingest/providers/http.rs
//! JSON-over-HTTP channel source: `GET {base}/channels/{id}/messages`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use std::time::Duration;

use crate::ingest::types::{ChannelId, ChannelSource, PageQuery, RawMessage};

pub struct HttpChannelSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChannelSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn messages_url(&self, channel: ChannelId) -> String {
        format!("{}/channels/{}/messages", self.base_url, channel)
    }
}

fn query_params(q: &PageQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", q.limit.to_string())];
    if let Some(min) = q.min_id {
        params.push(("min_id", min.to_string()));
    }
    if let Some(max) = q.max_id {
        params.push(("max_id", max.to_string()));
    }
    params
}

#[async_trait]
impl ChannelSource for HttpChannelSource {
    async fn fetch_page(&self, channel: ChannelId, query: PageQuery) -> Result<Vec<RawMessage>> {
        let resp = self
            .client
            .get(self.messages_url(channel))
            .query(&query_params(&query))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = ?e, source = "http", channel, "source http error");
                counter!("source_errors_total").increment(1);
                e
            })
            .context("channel http get()")?;
        let resp = resp.error_for_status().context("channel http status")?;
        let mut page: Vec<RawMessage> = resp.json().await.context("channel http .json()")?;
        // Some backends answer oldest-first; the pager relies on newest-first.
        page.sort_by(|a, b| b.id.cmp(&a.id));
        page.truncate(query.limit);
        Ok(page)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
