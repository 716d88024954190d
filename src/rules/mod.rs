// src/rules/mod.rs
//! Keyword rules as stored by the admin layer, plus the decoding of the legacy
//! encodings that persisted rows may still carry.
//!
//! Polarity has been written as `"positive"`/`"negative"` strings, as SQLite
//! booleans (`1`/`0`) and as JSON booleans over time; all three decode into
//! [`Polarity`]. The same goes for `is_regex`.

pub mod seed;
pub mod source;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub use source::{FileRulesetSource, RulesetSource, StaticRulesetSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn from_legacy_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "pos" | "1" | "true" => Some(Self::Positive),
            "negative" | "neg" | "0" | "false" => Some(Self::Negative),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyFlag {
    Flag(bool),
    Int(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for Polarity {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match LegacyFlag::deserialize(d)? {
            LegacyFlag::Flag(true) | LegacyFlag::Int(1) => Ok(Self::Positive),
            LegacyFlag::Flag(false) | LegacyFlag::Int(0) => Ok(Self::Negative),
            LegacyFlag::Int(n) => Err(de::Error::custom(format!("invalid polarity flag {n}"))),
            LegacyFlag::Text(s) => Self::from_legacy_str(&s)
                .ok_or_else(|| de::Error::custom(format!("unknown polarity `{s}`"))),
        }
    }
}

fn bool_or_int<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match LegacyFlag::deserialize(d)? {
        LegacyFlag::Flag(b) => Ok(b),
        LegacyFlag::Int(n) => Ok(n != 0),
        LegacyFlag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean `{other}`"))),
        },
    }
}

/// One keyword rule. `keyword` is unique across a ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    #[serde(default)]
    pub id: i64,
    pub keyword: String,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub is_regex: bool,
    #[serde(alias = "type")]
    pub polarity: Polarity,
    #[serde(default, alias = "stat_type_name", alias = "stat_type")]
    pub stat_bucket: Option<String>,
}

impl KeywordRule {
    pub fn literal(id: i64, keyword: impl Into<String>, polarity: Polarity) -> Self {
        Self {
            id,
            keyword: keyword.into(),
            is_regex: false,
            polarity,
            stat_bucket: None,
        }
    }

    pub fn regex(id: i64, pattern: impl Into<String>, polarity: Polarity) -> Self {
        Self {
            is_regex: true,
            ..Self::literal(id, pattern, polarity)
        }
    }

    pub fn in_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.stat_bucket = Some(bucket.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBucket {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default = "default_bucket_color")]
    pub color: String,
}

fn default_bucket_color() -> String {
    "#888888".to_string()
}

/// Trim keywords, drop empties and duplicates (first wins), assign ids to rows
/// that came without one. Bucket references to empty names are cleared.
pub fn normalize_rules(rules: Vec<KeywordRule>) -> Vec<KeywordRule> {
    let mut seen = HashSet::new();
    let mut next_id = rules.iter().map(|r| r.id).max().unwrap_or(0).max(0) + 1;
    let mut out = Vec::with_capacity(rules.len());
    for mut r in rules {
        let trimmed = r.keyword.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() != r.keyword.len() {
            r.keyword = trimmed.to_string();
        }
        if !seen.insert(r.keyword.clone()) {
            tracing::warn!(target: "rules", keyword = %r.keyword, "duplicate keyword ignored");
            continue;
        }
        if r.id <= 0 {
            r.id = next_id;
            next_id += 1;
        }
        if r.stat_bucket.as_deref().is_some_and(|b| b.trim().is_empty()) {
            r.stat_bucket = None;
        }
        out.push(r);
    }
    out
}
