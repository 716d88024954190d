// src/compiler.rs
//! Ruleset compiler and its TTL memo.
//!
//! `compile` is pure: rules in, matchers out. `RulesetCache` wraps a
//! [`RulesetSource`] and keeps the last compiled value for `ttl`; concurrent
//! misses may compile twice, which is harmless.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::highlight::Highlighter;
use crate::matcher::{KeywordMatcher, RejectedRule};
use crate::rules::{KeywordRule, Polarity, RulesetSource, StatBucket};

pub const DEFAULT_RULESET_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Default)]
pub struct CompiledRuleset {
    pub positive: KeywordMatcher,
    pub negative: KeywordMatcher,
    /// One matcher per bucket name, polarity ignored.
    pub buckets: BTreeMap<String, KeywordMatcher>,
    pub highlighter: Highlighter,
    /// Rules excluded because their pattern did not compile.
    pub rejected: Vec<RejectedRule>,
    pub rule_count: usize,
}

impl CompiledRuleset {
    pub fn bucket_names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }
}

pub fn compile(rules: &[KeywordRule]) -> CompiledRuleset {
    let (positive, mut rejected) =
        KeywordMatcher::build(rules.iter().filter(|r| r.polarity == Polarity::Positive));
    let (negative, neg_rejected) =
        KeywordMatcher::build(rules.iter().filter(|r| r.polarity == Polarity::Negative));
    rejected.extend(neg_rejected);

    let names: BTreeSet<&str> = rules
        .iter()
        .filter_map(|r| r.stat_bucket.as_deref())
        .collect();
    let buckets = names
        .into_iter()
        .map(|name| {
            // Bucket rejections repeat the polarity ones; drop them.
            let (m, _) = KeywordMatcher::build(
                rules
                    .iter()
                    .filter(|r| r.stat_bucket.as_deref() == Some(name)),
            );
            (name.to_string(), m)
        })
        .collect();

    for r in &rejected {
        warn!(target: "rules", keyword = %r.keyword, error = %r.error, "invalid keyword regex skipped");
    }

    CompiledRuleset {
        positive,
        negative,
        buckets,
        highlighter: Highlighter::new(rules),
        rejected,
        rule_count: rules.len(),
    }
}

struct Memo {
    compiled: Arc<CompiledRuleset>,
    at: DateTime<Utc>,
    invalidated: bool,
}

pub struct RulesetCache {
    source: Arc<dyn RulesetSource>,
    ttl: ChronoDuration,
    clock: SharedClock,
    memo: RwLock<Option<Memo>>,
}

impl RulesetCache {
    pub fn new(source: Arc<dyn RulesetSource>) -> Self {
        Self::with_ttl(
            source,
            ChronoDuration::seconds(DEFAULT_RULESET_TTL_SECS),
            Arc::new(SystemClock),
        )
    }

    pub fn with_ttl(source: Arc<dyn RulesetSource>, ttl: ChronoDuration, clock: SharedClock) -> Self {
        crate::metrics::describe_all();
        Self {
            source,
            ttl,
            clock,
            memo: RwLock::new(None),
        }
    }

    /// Compiled ruleset, recompiled when older than the TTL or after `invalidate`.
    pub fn current(&self) -> Arc<CompiledRuleset> {
        let now = self.clock.now();
        if let Ok(guard) = self.memo.read() {
            if let Some(m) = guard.as_ref() {
                if !m.invalidated && now.signed_duration_since(m.at) < self.ttl {
                    return m.compiled.clone();
                }
            }
        }
        self.recompile(now)
    }

    /// Mark the memo stale so the next `current()` recompiles (after admin edits).
    /// The old value stays around as a fallback if the source then fails.
    pub fn invalidate(&self) {
        let mut guard = self.memo.write().unwrap_or_else(|p| p.into_inner());
        if let Some(m) = guard.as_mut() {
            m.invalidated = true;
        }
        debug!(target: "rules", "compiled ruleset invalidated");
    }

    pub fn stat_buckets(&self) -> Vec<StatBucket> {
        self.source.list_stat_buckets().unwrap_or_else(|e| {
            warn!(target: "rules", error = ?e, "listing stat buckets failed");
            Vec::new()
        })
    }

    fn recompile(&self, now: DateTime<Utc>) -> Arc<CompiledRuleset> {
        let compiled = match self.source.list_keyword_rules() {
            Ok(rules) => Arc::new(compile(&rules)),
            Err(e) => {
                warn!(target: "rules", error = ?e, "rule source failed; keeping previous ruleset");
                counter!("ruleset_source_errors_total").increment(1);
                let guard = self.memo.read().unwrap_or_else(|p| p.into_inner());
                guard
                    .as_ref()
                    .map(|m| m.compiled.clone())
                    .unwrap_or_default()
            }
        };

        counter!("ruleset_compiles_total").increment(1);
        counter!("ruleset_rejected_rules_total").increment(compiled.rejected.len() as u64);
        gauge!("ruleset_rules").set(compiled.rule_count as f64);
        info!(
            target: "rules",
            rules = compiled.rule_count,
            rejected = compiled.rejected.len(),
            buckets = compiled.buckets.len(),
            "keyword ruleset compiled"
        );

        let mut guard = self.memo.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(Memo {
            compiled: compiled.clone(),
            at: now,
            invalidated: false,
        });
        compiled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rules::StaticRulesetSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        inner: StaticRulesetSource,
        calls: AtomicUsize,
    }

    impl RulesetSource for CountingSource {
        fn list_keyword_rules(&self) -> anyhow::Result<Vec<KeywordRule>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.list_keyword_rules()
        }
        fn list_stat_buckets(&self) -> anyhow::Result<Vec<StatBucket>> {
            self.inner.list_stat_buckets()
        }
    }

    fn rules() -> Vec<KeywordRule> {
        vec![
            KeywordRule::literal(1, "ок", Polarity::Positive).in_bucket("alert"),
            KeywordRule::literal(2, "✅", Polarity::Positive).in_bucket("green"),
            KeywordRule::literal(3, "бля", Polarity::Negative).in_bucket("alert"),
            KeywordRule::regex(4, "[bad", Polarity::Negative),
        ]
    }

    #[test]
    fn compile_partitions_by_polarity_and_bucket() {
        let c = compile(&rules());
        assert_eq!(c.positive.len(), 2);
        assert_eq!(c.negative.len(), 1);
        assert_eq!(c.bucket_names().collect::<Vec<_>>(), vec!["alert", "green"]);
        assert_eq!(c.buckets["alert"].len(), 2);
        assert_eq!(c.rejected.len(), 1);
    }

    #[test]
    fn ttl_memo_returns_same_arc_then_recompiles() {
        let src = Arc::new(CountingSource {
            inner: StaticRulesetSource::new(rules(), vec![]),
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let cache = RulesetCache::with_ttl(src.clone(), ChronoDuration::minutes(5), clock.clone());

        let a = cache.current();
        clock.advance(ChronoDuration::minutes(4));
        let b = cache.current();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);

        clock.advance(ChronoDuration::minutes(2));
        let c = cache.current();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_forces_recompile() {
        let src = Arc::new(CountingSource {
            inner: StaticRulesetSource::new(rules(), vec![]),
            calls: AtomicUsize::new(0),
        });
        let cache = RulesetCache::new(src.clone());
        let a = cache.current();
        cache.invalidate();
        let b = cache.current();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_source_keeps_previous_ruleset() {
        struct Flaky(AtomicUsize);
        impl RulesetSource for Flaky {
            fn list_keyword_rules(&self) -> anyhow::Result<Vec<KeywordRule>> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(vec![KeywordRule::literal(1, "ок", Polarity::Positive)])
                } else {
                    Err(anyhow::anyhow!("db locked"))
                }
            }
            fn list_stat_buckets(&self) -> anyhow::Result<Vec<StatBucket>> {
                Ok(vec![])
            }
        }
        let cache = RulesetCache::new(Arc::new(Flaky(AtomicUsize::new(0))));
        assert_eq!(cache.current().positive.len(), 1);
        cache.invalidate();
        let kept = cache.current();
        assert_eq!(kept.positive.len(), 1);
        assert!(kept.positive.is_match("все ок"));
    }
}
