// src/matcher.rs
//! Compiled keyword matcher: one boundary-wrapped regex for word-like literals and
//! raw regex rules, plus an Aho-Corasick automaton for symbol/emoji literals.
//!
//! The `regex` crate has no lookarounds, so the Unicode word boundaries are
//! matched as consumed, non-capturing context:
//!
//! ```text
//! (?i)(?:^|[^\p{L}\p{N}])(?:kw1|kw2|(?:raw-regex))(?:[^\p{L}\p{N}]|$)
//! ```
//!
//! For a yes/no test this is equivalent to lookbehind/lookahead. Span extraction
//! (see `highlight`) captures the keyword and resumes after it, so a separator
//! shared by two adjacent keywords still counts for both.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::rules::KeywordRule;

pub(crate) const BOUNDARY_BEFORE: &str = r"(?:^|[^\p{L}\p{N}])";
pub(crate) const BOUNDARY_AFTER: &str = r"(?:[^\p{L}\p{N}]|$)";

/// Compiled-size ceiling for a combined pattern (bytes of NFA).
const COMBINED_SIZE_LIMIT: usize = 32 * (1 << 20);

/// True for literals made only of letters, digits and whitespace (any script).
pub fn is_word_like(s: &str) -> bool {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[\p{L}\p{N}\s]+$").expect("word-like regex"));
    RE.is_match(s)
}

/// A rule that could not be compiled and was left out of its matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRule {
    pub keyword: String,
    pub error: String,
}

/// Classification of one rule for pattern building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fragment {
    /// Escaped word-like literal, boundary-wrapped.
    Word(String),
    /// Raw regex, validated on its own, boundary-wrapped.
    Pattern(String),
    /// Symbol/emoji literal, matched as plain substring.
    Symbol(String),
}

impl Fragment {
    /// Split a rule into its matching class. Invalid regex rules are rejected here
    /// so one bad row can't break the combined pattern.
    pub(crate) fn of(rule: &KeywordRule) -> Result<Self, RejectedRule> {
        if rule.is_regex {
            return match Regex::new(&rule.keyword) {
                Ok(_) => Ok(Self::Pattern(rule.keyword.clone())),
                Err(e) => Err(RejectedRule {
                    keyword: rule.keyword.clone(),
                    error: e.to_string(),
                }),
            };
        }
        if is_word_like(&rule.keyword) {
            Ok(Self::Word(regex::escape(&rule.keyword)))
        } else {
            Ok(Self::Symbol(rule.keyword.clone()))
        }
    }
}

/// Longest literal first, so `в норме` wins over `в` at the same position.
pub(crate) fn sort_longest_first(v: &mut [String]) {
    v.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
}

fn bounded_pattern(words: &[String], patterns: &[String]) -> String {
    let alts: Vec<String> = words
        .iter()
        .cloned()
        .chain(patterns.iter().map(|p| format!("(?:{p})")))
        .collect();
    format!("{BOUNDARY_BEFORE}(?:{}){BOUNDARY_AFTER}", alts.join("|"))
}

pub(crate) fn build_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .unicode(true)
        .size_limit(COMBINED_SIZE_LIMIT)
        .build()
}

#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    bounded: Option<Regex>,
    symbols: Option<AhoCorasick>,
    rule_count: usize,
}

impl KeywordMatcher {
    /// Matcher that never matches (empty polarity or bucket).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile `rules` into one matcher. Returns the matcher plus the rules that
    /// had to be excluded.
    pub fn build<'a, I>(rules: I) -> (Self, Vec<RejectedRule>)
    where
        I: IntoIterator<Item = &'a KeywordRule>,
    {
        let mut words = Vec::new();
        let mut patterns = Vec::new();
        let mut symbols = Vec::new();
        let mut rejected = Vec::new();

        for rule in rules {
            match Fragment::of(rule) {
                Ok(Fragment::Word(w)) => words.push(w),
                Ok(Fragment::Pattern(p)) => patterns.push(p),
                Ok(Fragment::Symbol(s)) => symbols.push(s.to_lowercase()),
                Err(r) => rejected.push(r),
            }
        }
        let rule_count = words.len() + patterns.len() + symbols.len();
        sort_longest_first(&mut words);

        let bounded = if words.is_empty() && patterns.is_empty() {
            None
        } else {
            match build_regex(&bounded_pattern(&words, &patterns)) {
                Ok(re) => Some(re),
                Err(e) => {
                    // Individually valid fragments can still clash (size, group
                    // names). Keep the literal words, drop the raw patterns.
                    tracing::error!(
                        target: "rules",
                        error = %e,
                        patterns = patterns.len(),
                        "combined keyword regex failed; falling back to literal words"
                    );
                    rejected.extend(patterns.drain(..).map(|p| RejectedRule {
                        keyword: p,
                        error: e.to_string(),
                    }));
                    if words.is_empty() {
                        None
                    } else {
                        build_regex(&bounded_pattern(&words, &[])).ok()
                    }
                }
            }
        };

        let symbols = if symbols.is_empty() {
            None
        } else {
            match AhoCorasick::new(&symbols) {
                Ok(ac) => Some(ac),
                Err(e) => {
                    tracing::error!(target: "rules", error = %e, "symbol automaton build failed");
                    None
                }
            }
        };

        (
            Self {
                bounded,
                symbols,
                rule_count,
            },
            rejected,
        )
    }

    /// Number of rules that made it into this matcher.
    pub fn len(&self) -> usize {
        self.rule_count
    }

    pub fn is_empty(&self) -> bool {
        self.bounded.is_none() && self.symbols.is_none()
    }

    /// Symbol containment first (cheap), then the boundary-wrapped regex.
    pub fn is_match(&self, text: &str) -> bool {
        if let Some(ac) = &self.symbols {
            if ac.is_match(&text.to_lowercase()) {
                return true;
            }
        }
        self.bounded.as_ref().is_some_and(|re| re.is_match(text))
    }
}
