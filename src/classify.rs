// src/classify.rs
//! Message classifier: positive/negative pass-fail and bucket membership.

use std::collections::BTreeSet;
use tracing::info;

use crate::compiler::CompiledRuleset;
use crate::ingest::types::RawMessage;

/// Bodies this long or longer are rejected before any matching. Length is in
/// UTF-16 code units, so an astral emoji counts twice.
pub const MAX_MESSAGE_LENGTH: usize = 120;

// Dev logging gate: MONITOR_DEV_LOG=1 AND dev env (debug build or SHUTTLE_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("MONITOR_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Never logs raw text, only a hashed id.
fn dev_log_verdict(event: &str, text: &str) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(text);
    info!(target: "filter", %id, event, len = utf16_len(text));
}

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// A message passes iff it hits at least one positive rule and no negative rule.
pub fn passes_filter(message: &str, ruleset: &CompiledRuleset) -> bool {
    if utf16_len(message) >= MAX_MESSAGE_LENGTH {
        dev_log_verdict("too_long", message);
        return false;
    }
    if !ruleset.positive.is_match(message) {
        dev_log_verdict("no_positive", message);
        return false;
    }
    if ruleset.negative.is_match(message) {
        dev_log_verdict("negative", message);
        return false;
    }
    dev_log_verdict("passed", message);
    true
}

/// Buckets whose matcher hits `message`. Polarity plays no part here.
pub fn classify_buckets<'r>(message: &str, ruleset: &'r CompiledRuleset) -> BTreeSet<&'r str> {
    ruleset
        .buckets
        .iter()
        .filter(|(_, m)| m.is_match(message))
        .map(|(name, _)| name.as_str())
        .collect()
}

/// Keep messages whose body passes the filter; bodiless messages are dropped.
pub fn filter_messages(messages: Vec<RawMessage>, ruleset: &CompiledRuleset) -> Vec<RawMessage> {
    messages
        .into_iter()
        .filter(|m| m.body.as_deref().is_some_and(|b| passes_filter(b, ruleset)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::rules::{KeywordRule, Polarity};

    fn ruleset() -> CompiledRuleset {
        compile(&[
            KeywordRule::literal(1, "✅", Polarity::Positive).in_bucket("alert"),
            KeywordRule::literal(2, "ок", Polarity::Positive).in_bucket("alert"),
            KeywordRule::literal(3, "синие", Polarity::Positive).in_bucket("blue"),
            KeywordRule::literal(4, "бля", Polarity::Negative),
            KeywordRule::literal(5, "?", Polarity::Negative),
        ])
    }

    #[test]
    fn positive_symbol_passes_negative_word_blocks() {
        let rs = ruleset();
        assert!(passes_filter("✅", &rs));
        assert!(!passes_filter("✅ бля ", &rs));
        assert!(!passes_filter("ок?", &rs));
    }

    #[test]
    fn no_positive_means_fail() {
        let rs = ruleset();
        assert!(!passes_filter("просто текст", &rs));
        assert!(!passes_filter("окно", &rs));
    }

    #[test]
    fn length_gate_is_inclusive() {
        let rs = ruleset();
        let base = "✅ ок ";
        let pad = |n: usize| format!("{base}{}", "я".repeat(n - base.chars().count()));
        assert!(!passes_filter(&pad(MAX_MESSAGE_LENGTH), &rs));
        assert!(!passes_filter(&pad(MAX_MESSAGE_LENGTH + 5), &rs));
        assert!(passes_filter(&pad(MAX_MESSAGE_LENGTH - 1), &rs));
    }

    #[test]
    fn astral_emoji_count_twice_toward_the_limit() {
        let rs = ruleset();
        // 3 + 58 * 2 = 119 units
        let under = format!("ок {}", "🚨".repeat(58));
        assert_eq!(under.chars().count(), 61);
        assert!(passes_filter(&under, &rs));
        assert!(!passes_filter(&format!("{under}я"), &rs));
        assert!(!passes_filter(&format!("ок {}", "🚨".repeat(60)), &rs));
    }

    #[test]
    fn empty_positive_set_rejects_everything() {
        let rs = compile(&[KeywordRule::literal(1, "бля", Polarity::Negative)]);
        assert!(!passes_filter("✅ ок", &rs));
    }

    #[test]
    fn buckets_are_independent_of_polarity() {
        let rs = ruleset();
        let b = classify_buckets("синие ок бля", &rs);
        assert_eq!(b.into_iter().collect::<Vec<_>>(), vec!["alert", "blue"]);
        assert!(classify_buckets("ничего", &rs).is_empty());
    }

    #[test]
    fn filter_skips_bodiless_messages() {
        let rs = ruleset();
        let msgs = vec![
            RawMessage::new(1, 10, Some("✅")),
            RawMessage::new(2, 11, None),
            RawMessage::new(3, 12, Some("бля ✅")),
        ];
        let kept = filter_messages(msgs, &rs);
        assert_eq!(kept.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
    }
}
