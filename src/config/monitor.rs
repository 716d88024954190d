// src/config/monitor.rs
use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::coalesce::DEFAULT_COALESCE_TTL_MS;
use crate::compiler::DEFAULT_RULESET_TTL_SECS;
use crate::ingest::cache::{
    CacheSettings, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_RETENTION_SECS, DEFAULT_STALE_AFTER_SECS,
};
use crate::ingest::pager::{DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE};
use crate::ingest::scheduler::DEFAULT_PURGE_INTERVAL_SECS;
use crate::ingest::types::ChannelId;

pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";
const ENV_SOURCE_URL: &str = "MONITOR_SOURCE_URL";
const ENV_CHANNELS: &str = "MONITOR_CHANNELS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Channels every window reads from.
    pub channels: Vec<ChannelId>,
    /// Base URL of the channel bridge. Unset means an empty in-memory source.
    pub source_url: Option<String>,
    /// Keyword file; unset falls back to env, then config/keywords.*, then the seed.
    pub rules_path: Option<PathBuf>,
    pub ruleset_ttl_secs: i64,
    pub stale_after_secs: i64,
    pub fetch_timeout_secs: u64,
    pub page_size: usize,
    pub max_pages: usize,
    pub purge_interval_secs: u64,
    pub retention_secs: i64,
    pub coalesce_ttl_ms: u64,
    /// Offset used for the stats hour-of-day, in minutes east of UTC.
    pub stats_utc_offset_minutes: i32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            source_url: None,
            rules_path: None,
            ruleset_ttl_secs: DEFAULT_RULESET_TTL_SECS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            purge_interval_secs: DEFAULT_PURGE_INTERVAL_SECS,
            retention_secs: DEFAULT_RETENTION_SECS,
            coalesce_ttl_ms: DEFAULT_COALESCE_TTL_MS,
            stats_utc_offset_minutes: 0,
        }
    }
}

impl MonitorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading monitor config from {}", path.display()))?;
        let mut cfg: MonitorConfig = toml::from_str(&data).context("parsing monitor config toml")?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load config using env var + fallbacks:
    /// 1) $MONITOR_CONFIG_PATH
    /// 2) config/monitor.toml
    /// 3) built-in defaults
    /// then apply env overrides.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("MONITOR_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from_file(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from_file(DEFAULT_CONFIG_PATH)?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var(ENV_SOURCE_URL) {
            let url = url.trim();
            self.source_url = (!url.is_empty()).then(|| url.to_string());
        }
        if let Ok(list) = env::var(ENV_CHANNELS) {
            self.channels = parse_channel_list(&list)?;
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.ruleset_ttl_secs <= 0 {
            self.ruleset_ttl_secs = defaults.ruleset_ttl_secs;
        }
        if self.stale_after_secs < 0 {
            self.stale_after_secs = defaults.stale_after_secs;
        }
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = defaults.fetch_timeout_secs;
        }
        if self.page_size == 0 {
            self.page_size = defaults.page_size;
        }
        if self.max_pages == 0 {
            self.max_pages = defaults.max_pages;
        }
        if self.purge_interval_secs == 0 {
            self.purge_interval_secs = defaults.purge_interval_secs;
        }
        if self.retention_secs <= 0 {
            self.retention_secs = defaults.retention_secs;
        }
        // FixedOffset accepts strictly less than a day either way.
        if self.stats_utc_offset_minutes.abs() >= 24 * 60 {
            self.stats_utc_offset_minutes = 0;
        }
        self.channels.dedup();
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            stale_after: ChronoDuration::seconds(self.stale_after_secs),
            retention: ChronoDuration::seconds(self.retention_secs),
            page_size: self.page_size,
            max_pages: self.max_pages,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn ruleset_ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.ruleset_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn coalesce_ttl(&self) -> Duration {
        Duration::from_millis(self.coalesce_ttl_ms)
    }

    pub fn stats_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.stats_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// "-1001, -1002" -> [-1001, -1002]
fn parse_channel_list(s: &str) -> Result<Vec<ChannelId>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<ChannelId>()
                .map_err(|e| anyhow!("MONITOR_CHANNELS: bad channel id {p:?}: {e}"))
        })
        .collect()
}
