// src/rules/source.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::{normalize_rules, seed, KeywordRule, StatBucket};

pub const ENV_RULES_PATH: &str = "MONITOR_RULES_PATH";

/// Read side of the keyword store. Mutation happens in the admin layer.
pub trait RulesetSource: Send + Sync {
    fn list_keyword_rules(&self) -> Result<Vec<KeywordRule>>;
    fn list_stat_buckets(&self) -> Result<Vec<StatBucket>>;
}

/// Fixed in-memory ruleset (tests, embedded defaults).
#[derive(Debug, Clone, Default)]
pub struct StaticRulesetSource {
    rules: Vec<KeywordRule>,
    buckets: Vec<StatBucket>,
}

impl StaticRulesetSource {
    pub fn new(rules: Vec<KeywordRule>, buckets: Vec<StatBucket>) -> Self {
        Self {
            rules: normalize_rules(rules),
            buckets,
        }
    }

    pub fn seeded() -> Self {
        Self::new(seed::default_rules(), seed::default_buckets())
    }
}

impl RulesetSource for StaticRulesetSource {
    fn list_keyword_rules(&self) -> Result<Vec<KeywordRule>> {
        Ok(self.rules.clone())
    }

    fn list_stat_buckets(&self) -> Result<Vec<StatBucket>> {
        Ok(self.buckets.clone())
    }
}

/// Keyword file on disk, TOML or JSON. Re-read on every call; the compiled
/// ruleset cache decides how often that happens.
#[derive(Debug, Clone)]
pub struct FileRulesetSource {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct RulesFile {
    #[serde(default)]
    buckets: Vec<StatBucket>,
    #[serde(default)]
    keywords: Vec<KeywordRule>,
}

impl FileRulesetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RulesFile> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading keyword rules from {}", self.path.display()))?;
        let ext = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_rules_file(&content, ext.as_str())
    }
}

impl RulesetSource for FileRulesetSource {
    fn list_keyword_rules(&self) -> Result<Vec<KeywordRule>> {
        Ok(normalize_rules(self.load()?.keywords))
    }

    fn list_stat_buckets(&self) -> Result<Vec<StatBucket>> {
        Ok(self.load()?.buckets)
    }
}

/// Pick the rule source:
/// 1) explicit path (from config)
/// 2) $MONITOR_RULES_PATH
/// 3) config/keywords.toml, config/keywords.json
/// 4) built-in seed ruleset
pub fn default_source(explicit: Option<&Path>) -> Result<Box<dyn RulesetSource>> {
    if let Some(p) = explicit {
        if !p.exists() {
            return Err(anyhow!("rules path {} does not exist", p.display()));
        }
        return Ok(Box::new(FileRulesetSource::new(p)));
    }
    if let Ok(p) = std::env::var(ENV_RULES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Box::new(FileRulesetSource::new(pb)));
        }
        return Err(anyhow!("MONITOR_RULES_PATH points to non-existent path"));
    }
    for candidate in ["config/keywords.toml", "config/keywords.json"] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return Ok(Box::new(FileRulesetSource::new(pb)));
        }
    }
    tracing::info!(target: "rules", "no keyword file found, using built-in seed ruleset");
    Ok(Box::new(StaticRulesetSource::seeded()))
}

fn parse_rules_file(s: &str, hint_ext: &str) -> Result<RulesFile> {
    if hint_ext == "toml" {
        return toml::from_str(s).context("parsing keyword rules toml");
    }
    if let Ok(v) = serde_json::from_str::<RulesFile>(s) {
        return Ok(v);
    }
    // Bare array of keyword rows, as exported by the admin screen.
    if let Ok(keywords) = serde_json::from_str::<Vec<KeywordRule>>(s) {
        return Ok(RulesFile {
            buckets: Vec::new(),
            keywords,
        });
    }
    toml::from_str(s).map_err(|e| anyhow!("unsupported keyword file format: {e}"))
}
